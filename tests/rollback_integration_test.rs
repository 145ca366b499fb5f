// ==========================================
// 回滚集成测试
// ==========================================
// 测试范围:
// 1. 回滚工作流 A 只删除 A 创建的记录，B 的记录一条不少
// 2. 父记录仍有其他工作流的子记录时保留并警告
// 3. 步骤失败后停止，修复后从失败步骤继续
// 4. 未完成的工作流不允许回滚
// ==========================================

mod test_helpers;

use rusqlite::Connection;
use saints_import::domain::types::{ConflictPolicy, EntityKind, RollbackStatus, StepStatus, WorkflowState};
use saints_import::engine::{EngineError, PhaseOrchestrator, RollbackManager};
use saints_import::repository::WorkflowRepository;
use std::sync::{Arc, Mutex};

fn setup() -> (tempfile::NamedTempFile, Arc<Mutex<Connection>>) {
    let (temp_file, db_path) = test_helpers::create_test_db().expect("创建测试数据库失败");
    let conn = test_helpers::open_test_connection(&db_path).expect("打开数据库失败");
    (temp_file, conn)
}

/// A 导入 loc-1、loc-2；B 为 loc-2 的圣徒追加 2024 年档案并新建 loc-3
fn import_two_workflows(orch: &PhaseOrchestrator) -> (String, String) {
    let wf_a = orch
        .start(test_helpers::snapshot_for(&["loc-1", "loc-2"]), ConflictPolicy::SkipIfExists, "a")
        .unwrap();
    test_helpers::run_to_completion(orch, &wf_a);

    let mut snapshot_b = test_helpers::snapshot_for(&["loc-2", "loc-3"]);
    snapshot_b.location_sheets[0].tabs[1]
        .rows
        .push(test_helpers::row(&["1", "2024", "Smash"]));
    let wf_b = orch.start(snapshot_b, ConflictPolicy::SkipIfExists, "b").unwrap();
    test_helpers::run_to_completion(orch, &wf_b);

    (wf_a, wf_b)
}

fn tagged_ids(conn: &Arc<Mutex<Connection>>, workflow_id: &str) -> Vec<(EntityKind, String)> {
    let guard = conn.lock().unwrap();
    let mut ids = Vec::new();
    for kind in [
        EntityKind::Location,
        EntityKind::Saint,
        EntityKind::SaintYear,
        EntityKind::Milestone,
        EntityKind::Event,
    ] {
        for id in WorkflowRepository::list_tagged_ids_tx(&guard, workflow_id, kind).unwrap() {
            ids.push((kind, id));
        }
    }
    ids
}

fn exists(conn: &Arc<Mutex<Connection>>, kind: EntityKind, id: &str) -> bool {
    let guard = conn.lock().unwrap();
    let n: i64 = guard
        .query_row(&format!("SELECT COUNT(*) FROM {} WHERE id = ?1", kind.table()), [id], |row| row.get(0))
        .unwrap();
    n == 1
}

#[test]
fn test_rollback_removes_only_own_records() {
    let (_tmp, conn) = setup();
    let orch = PhaseOrchestrator::new(conn.clone());
    let (wf_a, wf_b) = import_two_workflows(&orch);

    assert_eq!(test_helpers::count_rows(&conn, "location"), 3);
    assert_eq!(test_helpers::count_rows(&conn, "saint_year"), 4);
    assert_eq!(test_helpers::count_rows(&conn, "event"), 7);

    let b_records = tagged_ids(&conn, &wf_b);
    assert_eq!(b_records.len(), 8);

    let manager = RollbackManager::new(conn.clone());
    let info = manager.compute_rollback_info(&wf_a).unwrap();
    assert!(info.can_rollback);
    assert_eq!(info.affected_record_counts[&EntityKind::Event], 4);
    assert_eq!(info.rollback_steps.len(), 6);
    // loc-2 的圣徒与门店被保留
    assert_eq!(info.warnings.len(), 2);

    let rollback = manager.execute_rollback(&wf_a).unwrap();
    assert_eq!(rollback.status, RollbackStatus::Completed);
    assert!(rollback.steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(rollback.warnings.len(), 2);

    // B 的记录全部保留
    for (kind, id) in &b_records {
        assert!(exists(&conn, *kind, id), "{} {} 被误删", kind, id);
    }

    assert_eq!(test_helpers::count_rows(&conn, "location"), 2);
    assert_eq!(test_helpers::count_rows(&conn, "saint"), 2);
    assert_eq!(test_helpers::count_rows(&conn, "saint_year"), 2);
    assert_eq!(test_helpers::count_rows(&conn, "milestone"), 1);
    assert_eq!(test_helpers::count_rows(&conn, "event"), 3);

    assert_eq!(orch.get_workflow(&wf_a).unwrap().state, WorkflowState::RolledBack);
    assert_eq!(orch.get_workflow(&wf_b).unwrap().state, WorkflowState::Completed);
}

#[test]
fn test_failed_step_resumes_after_fix() {
    let (_tmp, conn) = setup();
    let orch = PhaseOrchestrator::new(conn.clone());
    let wf = orch
        .start(test_helpers::snapshot_for(&["loc-1"]), ConflictPolicy::SkipIfExists, "a")
        .unwrap();
    test_helpers::run_to_completion(&orch, &wf);

    conn.lock()
        .unwrap()
        .execute_batch("CREATE TRIGGER block_saint_delete BEFORE DELETE ON saint BEGIN SELECT RAISE(ABORT, 'blocked'); END;")
        .unwrap();

    let manager = RollbackManager::new(conn.clone());
    let failed = manager.execute_rollback(&wf).unwrap();
    assert_eq!(failed.status, RollbackStatus::Failed);
    assert!(failed.error_message.as_deref().unwrap_or_default().contains("delete_saint"));
    let statuses: Vec<StepStatus> = failed.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Completed,
            StepStatus::Completed,
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Pending,
            StepStatus::Pending,
        ]
    );
    assert_eq!(test_helpers::count_rows(&conn, "event"), 0);
    assert_eq!(test_helpers::count_rows(&conn, "saint"), 1);
    assert_eq!(orch.get_workflow(&wf).unwrap().state, WorkflowState::Completed);

    // 预览显示续跑位置
    let info = manager.compute_rollback_info(&wf).unwrap();
    assert_eq!(info.rollback_steps[3].status, StepStatus::Failed);

    conn.lock().unwrap().execute_batch("DROP TRIGGER block_saint_delete;").unwrap();

    let resumed = manager.execute_rollback(&wf).unwrap();
    assert_eq!(resumed.rollback_id, failed.rollback_id);
    assert_eq!(resumed.status, RollbackStatus::Completed);
    assert_eq!(resumed.steps[0].records_deleted, 2);
    assert_eq!(test_helpers::count_rows(&conn, "saint"), 0);
    assert_eq!(test_helpers::count_rows(&conn, "location"), 0);
    assert_eq!(orch.get_workflow(&wf).unwrap().state, WorkflowState::RolledBack);
}

#[test]
fn test_incomplete_workflow_cannot_roll_back() {
    let (_tmp, conn) = setup();
    let orch = PhaseOrchestrator::new(conn.clone());
    let wf = orch
        .start(test_helpers::snapshot_for(&["loc-1"]), ConflictPolicy::SkipIfExists, "a")
        .unwrap();

    let manager = RollbackManager::new(conn);
    assert!(!manager.compute_rollback_info(&wf).unwrap().can_rollback);
    assert!(matches!(
        manager.execute_rollback(&wf),
        Err(EngineError::InvalidTransition { .. })
    ));
}
