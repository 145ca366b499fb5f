// ==========================================
// 重复记录清理集成测试
// ==========================================
// 测试范围:
// 1. 评分 1/3/2 的三条 SaintYear → 保留评分 3，删除两条
// 2. dry-run 与真实执行选择相同的组与幸存记录
// 3. 幸存记录校验失败时整组回滚
// 4. 里程碑按 count 去重后，按 date 的组不再重复处理
// ==========================================

mod test_helpers;

use saints_import::engine::{DedupEngine, DedupTarget};
use saints_import::repository::{EventRepository, SaintYearRepository};

fn setup() -> (tempfile::NamedTempFile, std::sync::Arc<std::sync::Mutex<rusqlite::Connection>>) {
    let (temp_file, db_path) = test_helpers::create_test_db().expect("创建测试数据库失败");
    let conn = test_helpers::open_test_connection(&db_path).expect("打开数据库失败");
    (temp_file, conn)
}

#[test]
fn test_keeps_most_complete_saint_year() {
    let (_tmp, conn) = setup();
    let (low, high, mid) = {
        let guard = conn.lock().unwrap();
        let location = test_helpers::insert_location(&guard, "loc-1");
        let saint = test_helpers::insert_saint(&guard, &location.id, "1");
        (
            test_helpers::insert_saint_year(&guard, &saint.id, 2023, 1),
            test_helpers::insert_saint_year(&guard, &saint.id, 2023, 3),
            test_helpers::insert_saint_year(&guard, &saint.id, 2023, 2),
        )
    };

    let engine = DedupEngine::new(conn.clone());
    let report = engine.reconcile(DedupTarget::SaintYear, false).unwrap();

    assert_eq!(report.groups_found, 1);
    assert_eq!(report.groups_processed, 1);
    assert_eq!(report.records_deleted, 2);
    assert!(report.errors.is_empty());

    let decision = &report.decisions[0];
    assert_eq!(decision.survivor_id, high.id);
    assert_eq!(decision.survivor_score, 3);
    let mut deleted: Vec<&str> = decision.deleted.iter().map(|d| d.id.as_str()).collect();
    deleted.sort();
    let mut expected = vec![low.id.as_str(), mid.id.as_str()];
    expected.sort();
    assert_eq!(deleted, expected);
    assert!(decision.deleted.iter().all(|d| d.score <= decision.survivor_score));

    let guard = conn.lock().unwrap();
    let remaining = SaintYearRepository::list_all_tx(&guard).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, high.id);
}

#[test]
fn test_dry_run_matches_live_run() {
    let (_tmp, conn) = setup();
    {
        let guard = conn.lock().unwrap();
        let location = test_helpers::insert_location(&guard, "loc-1");
        for number in ["1", "2", "3"] {
            let saint = test_helpers::insert_saint(&guard, &location.id, number);
            test_helpers::insert_saint_year(&guard, &saint.id, 2022, 0);
            test_helpers::insert_saint_year(&guard, &saint.id, 2022, 4);
            test_helpers::insert_saint_year(&guard, &saint.id, 2023, 1);
        }
    }

    let engine = DedupEngine::new(conn.clone()).with_batch_size(2);
    let preview = engine.reconcile(DedupTarget::SaintYear, true).unwrap();
    assert!(preview.dry_run);
    assert!(preview.decisions.iter().all(|d| !d.applied));
    assert_eq!(test_helpers::count_rows(&conn, "saint_year"), 9);

    let live = engine.reconcile(DedupTarget::SaintYear, false).unwrap();
    assert_eq!(preview.groups_found, live.groups_found);
    assert_eq!(preview.records_deleted, live.records_deleted);

    let summarize = |report: &saints_import::engine::DedupReport| {
        let mut v: Vec<(String, String, Vec<String>)> = report
            .decisions
            .iter()
            .map(|d| {
                let mut deleted: Vec<String> = d.deleted.iter().map(|r| r.id.clone()).collect();
                deleted.sort();
                (d.key.clone(), d.survivor_id.clone(), deleted)
            })
            .collect();
        v.sort();
        v
    };
    assert_eq!(summarize(&preview), summarize(&live));
    assert_eq!(test_helpers::count_rows(&conn, "saint_year"), 6);
}

#[test]
fn test_verification_failure_rolls_back_group() {
    let (_tmp, conn) = setup();
    let survivor = {
        let guard = conn.lock().unwrap();
        let location = test_helpers::insert_location(&guard, "loc-1");
        let saint = test_helpers::insert_saint(&guard, &location.id, "1");
        test_helpers::insert_event(&guard, &saint, None);
        let survivor = test_helpers::insert_event(&guard, &saint, Some("Saint Day"));

        // 删除任何记录时连带删除幸存记录，模拟并发删除
        guard
            .execute_batch(&format!(
                "CREATE TRIGGER zap_survivor AFTER DELETE ON event WHEN OLD.id <> '{id}'
                 BEGIN DELETE FROM event WHERE id = '{id}'; END;",
                id = survivor.id
            ))
            .unwrap();
        survivor
    };

    let engine = DedupEngine::new(conn.clone());
    let report = engine.reconcile(DedupTarget::Event, false).unwrap();

    assert_eq!(report.groups_failed, 1);
    assert_eq!(report.records_deleted, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(!report.decisions[0].applied);
    assert_eq!(report.decisions[0].survivor_id, survivor.id);

    // 整组回滚，两条记录都还在
    let guard = conn.lock().unwrap();
    assert_eq!(EventRepository::list_all_tx(&guard).unwrap().len(), 2);
    assert!(EventRepository::find_by_id_tx(&guard, &survivor.id).unwrap().is_some());
    assert!(report.errors[0].contains(&survivor.id));
}

#[test]
fn test_unique_data_on_loser_is_reported() {
    let (_tmp, conn) = setup();
    {
        let guard = conn.lock().unwrap();
        let location = test_helpers::insert_location(&guard, "loc-1");
        let saint = test_helpers::insert_saint(&guard, &location.id, "1");
        test_helpers::insert_milestone(&guard, &saint.id, 1000, Some("Rare Sour"));
        let mut richer = test_helpers::insert_milestone(&guard, &saint.id, 1000, Some("Lager"));
        richer.sticker = Some("gold".to_string());
        saints_import::repository::MilestoneRepository::update_tx(&guard, &richer).unwrap();
    }

    let engine = DedupEngine::new(conn.clone());
    let reports = engine.reconcile_all(false).unwrap();

    let by_count = reports.iter().find(|r| r.target == DedupTarget::MilestoneByCount).unwrap();
    assert_eq!(by_count.records_deleted, 1);
    assert_eq!(by_count.warnings.len(), 1);
    assert!(by_count.warnings[0].contains("beer=Rare Sour"));

    // 同日期的组已在按 count 清理时消除
    let by_date = reports.iter().find(|r| r.target == DedupTarget::MilestoneByDate).unwrap();
    assert_eq!(by_date.groups_found, 0);
    assert_eq!(test_helpers::count_rows(&conn, "milestone"), 1);
}
