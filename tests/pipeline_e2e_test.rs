// ==========================================
// 导入管道端到端测试
// ==========================================
// 测试范围:
// 1. CSV 目录 → 快照 → 五阶段审批 → count 审批入队 → worker 执行 import
// 2. skip-if-exists 重复导入不改变记录数
// 3. verify 阶段 can_proceed=false 时审批被拒绝
// ==========================================

mod test_helpers;

use saints_import::app::AppState;
use saints_import::domain::types::{ConflictPolicy, JobState, JobType, PhaseKind, PhaseStatus, WorkflowState};
use saints_import::domain::workflow::RawTab;
use saints_import::engine::{EngineError, PhaseOrchestrator};
use tempfile::TempDir;

async fn setup_state() -> (tempfile::NamedTempFile, AppState) {
    let (temp_file, db_path) = test_helpers::create_test_db().expect("创建测试数据库失败");
    let state = AppState::new(test_helpers::test_config(&db_path)).await.expect("初始化AppState失败");
    (temp_file, state)
}

fn table_counts(state: &AppState) -> Vec<i64> {
    ["location", "saint", "saint_year", "milestone", "event"]
        .iter()
        .map(|t| test_helpers::count_rows(&state.conn, t))
        .collect()
}

#[tokio::test]
async fn test_csv_import_through_job_queue() {
    let (_tmp, state) = setup_state().await;
    let source_dir = TempDir::new().unwrap();
    test_helpers::write_snapshot_csv(source_dir.path(), &test_helpers::snapshot_for(&["loc-1", "loc-2"]));

    let snapshot = state.load_snapshot(source_dir.path(), "master").await.unwrap();
    assert_eq!(snapshot.location_sheets.len(), 2);

    let orch = state.orchestrator.clone();
    let wf = orch.start(snapshot, ConflictPolicy::SkipIfExists, "tester").unwrap();

    for phase in [PhaseKind::Scan, PhaseKind::Locations, PhaseKind::Verify] {
        let result = orch.execute_current_phase(&wf).unwrap();
        assert!(result.can_proceed, "{}: {}", phase, result.summary);
        orch.approve(&wf, phase).unwrap();
    }

    let count = orch.execute_current_phase(&wf).unwrap();
    assert_eq!(count.status, PhaseStatus::Success);
    let outcome = orch.approve(&wf, PhaseKind::Count).unwrap();
    assert_eq!(outcome.next_state, WorkflowState::Import);
    let job_id = outcome.job_id.expect("count 审批后应入队 import 任务");

    // 入队前未写入任何档案
    assert_eq!(table_counts(&state), vec![0, 0, 0, 0, 0]);

    let job = state.job_queue.get_job(&job_id).unwrap();
    assert_eq!(job.job_type, JobType::Import);
    assert_eq!(job.payload["workflow_id"], wf.as_str());

    let worker = state.worker();
    assert_eq!(worker.run_once().await.unwrap(), Some(job_id.clone()));

    let status = state.job_queue.get_status(&job_id).unwrap();
    assert_eq!(status.state, JobState::Completed);
    assert_eq!(status.progress, 1.0);
    assert_eq!(table_counts(&state), vec![2, 2, 2, 2, 4]);

    // import 结果同样需要人工审批
    assert_eq!(orch.get_workflow(&wf).unwrap().state, WorkflowState::Import);
    orch.approve(&wf, PhaseKind::Import).unwrap();
    assert_eq!(orch.get_workflow(&wf).unwrap().state, WorkflowState::Completed);
}

#[tokio::test]
async fn test_skip_if_exists_reimport_is_idempotent() {
    let (_tmp, state) = setup_state().await;
    let orch = PhaseOrchestrator::new(state.conn.clone());

    let first = orch
        .start(test_helpers::snapshot_for(&["loc-1", "loc-2"]), ConflictPolicy::SkipIfExists, "a")
        .unwrap();
    test_helpers::run_to_completion(&orch, &first);
    let after_first = table_counts(&state);

    let second = orch
        .start(test_helpers::snapshot_for(&["loc-1", "loc-2"]), ConflictPolicy::SkipIfExists, "b")
        .unwrap();
    test_helpers::run_to_completion(&orch, &second);

    assert_eq!(table_counts(&state), after_first);
    let tagged = saints_import::repository::WorkflowRepository::new(state.conn.clone())
        .count_tagged(&second)
        .unwrap();
    assert!(tagged.values().all(|n| *n == 0));
}

#[tokio::test]
async fn test_verify_gate_blocks_invalid_tab() {
    let (_tmp, state) = setup_state().await;
    let orch = state.orchestrator.clone();

    let mut snapshot = test_helpers::snapshot_for(&["loc-1"]);
    snapshot.location_sheets[0].tabs[1] = RawTab::new(
        "Historical",
        vec![test_helpers::row(&["Saint Number", "Historical Burger"]), test_helpers::row(&["1", "Classic"])],
    );
    let wf = orch.start(snapshot, ConflictPolicy::SkipIfExists, "tester").unwrap();

    for phase in [PhaseKind::Scan, PhaseKind::Locations] {
        orch.execute_current_phase(&wf).unwrap();
        orch.approve(&wf, phase).unwrap();
    }

    let verify = orch.execute_current_phase(&wf).unwrap();
    assert!(!verify.can_proceed);
    assert_eq!(verify.details["invalidTabs"], 1);

    let err = orch.approve(&wf, PhaseKind::Verify).unwrap_err();
    assert!(matches!(err, EngineError::PhaseGateBlocked { .. }));

    let status = orch.status(&wf).unwrap();
    assert_ne!(status.state, WorkflowState::Count);
    assert_eq!(status.current_phase, PhaseKind::Verify);
    assert_eq!(table_counts(&state), vec![0, 0, 0, 0, 0]);
}
