// ==========================================
// ImportOrchestrator 集成测试
// ==========================================
// 测试目标: 目录级导入的端到端行为
// - 客户/车辆关联、未关联标记、同名冲突
// - 幂等、日期与车牌规范化、文件内去重
// - 表头拒绝、编码探测、批次隔离、断点续传、预演
// ==========================================

mod test_helpers;

use garage_import::config::{config_keys, ConfigManager, ConfigOverrides};
use garage_import::domain::EntityKind;
use garage_import::importer::{DirectoryImporter, ImportError, ImportOrchestrator};
use garage_import::logging;
use garage_import::repository::CheckpointStore;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use test_helpers::{
    count_rows, customers_named, invoice_csv, run_import, vehicle, FaultyStore, TestEnv,
};

const CUSTOMERS_CSV: &str = "\
Name,Mobile,Email
Mr John Smith,07700 900123,john@example.com
Jane Doe,07700 900456,JANE@example.com
Mr John Smith,07700 900123,john@example.com
";

const VEHICLES_CSV: &str = "\
Registration,Make,Model,Customer,MOT Expiry
ab12 xyz,Ford,Focus,Jane Doe,15/03/2024
CD34 EFG,Vauxhall,Corsa,Unknown Person,2024-06-01
";

#[tokio::test]
async fn test_end_to_end_customers_and_vehicles() {
    logging::init_test();

    let env = TestEnv::new();
    env.write_csv("Customers.csv", CUSTOMERS_CSV);
    env.write_csv("Vehicles.csv", VEHICLES_CSV);
    let store = env.open_store();

    let report = run_import(env.config(), Arc::clone(&store)).await;

    // 客户: 3 行 → 2 个客户
    assert_eq!(report.files_processed, 2);
    assert_eq!(count_rows(&store, EntityKind::Customer), 2);
    let customers = &report.per_file[0];
    assert_eq!(customers.entity_kind, Some(EntityKind::Customer));
    assert_eq!(customers.total_rows, 3);
    assert_eq!(customers.inserted, 2);
    assert_eq!(customers.unchanged, 1);

    // 车辆: Jane Doe 已关联, Unknown Person 未关联
    let jane = customers_named(&store, "Jane Doe");
    assert_eq!(jane.len(), 1);
    assert_eq!(jane[0].attribute("email"), Some("jane@example.com"));

    let linked = vehicle(&store, "AB12XYZ").expect("车辆应已写入");
    assert_eq!(linked.links.customer_id, jane[0].id);
    assert_eq!(linked.attribute("mot_expiry"), Some("2024-03-15"));

    let orphan = vehicle(&store, "CD34EFG").expect("车辆应已写入");
    assert_eq!(orphan.links.customer_id, None);

    let vehicles = &report.per_file[1];
    assert_eq!(vehicles.inserted, 2);
    assert_eq!(vehicles.unlinked, 1);
    assert_eq!(report.manual_linking.len(), 1);
    assert_eq!(report.manual_linking[0].reference, "Unknown Person");
    assert_eq!(report.manual_linking[0].row, 2);

    // 未关联不是错误
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    logging::init_test();

    let env = TestEnv::new();
    env.write_csv("Customers.csv", CUSTOMERS_CSV);
    env.write_csv("Vehicles.csv", VEHICLES_CSV);
    let store = env.open_store();

    let first = run_import(env.config(), Arc::clone(&store)).await;
    assert_eq!(first.totals.inserted, 4);

    let second = run_import(env.config(), Arc::clone(&store)).await;
    assert_eq!(second.totals.inserted, 0);
    assert_eq!(second.totals.updated, 0);
    assert_eq!(second.totals.unchanged, 5);
    assert_eq!(count_rows(&store, EntityKind::Customer), 2);
    assert_eq!(count_rows(&store, EntityKind::Vehicle), 2);

    // 每次非预演导入每个文件记一条导入日志
    let conn = store.connection();
    let conn = conn.lock().unwrap();
    let logs: i64 = conn
        .query_row("SELECT COUNT(*) FROM import_file_log", [], |row| row.get(0))
        .unwrap();
    assert_eq!(logs, 4);
}

#[tokio::test]
async fn test_dates_normalize_to_iso() {
    let env = TestEnv::new();
    env.write_csv(
        "vehicles.csv",
        "Reg No,MOT Due\nAA11AAA,15/03/2024\nBB22BBB,2024-03-15\nCC33CCC,15-03-2024\n",
    );
    let store = env.open_store();

    run_import(env.config(), Arc::clone(&store)).await;

    for reg in ["AA11AAA", "BB22BBB", "CC33CCC"] {
        let stored = vehicle(&store, reg).unwrap();
        assert_eq!(stored.attribute("mot_expiry"), Some("2024-03-15"), "{}", reg);
    }
}

#[tokio::test]
async fn test_registration_variants_fold_into_one_vehicle() {
    let env = TestEnv::new();
    env.write_csv(
        "Vehicles.csv",
        "Registration,Make\nab12 xyz,Ford\nAB12XYZ,Ford\nAb12-Xyz,Ford\n",
    );
    let store = env.open_store();

    let report = run_import(env.config(), Arc::clone(&store)).await;

    assert_eq!(count_rows(&store, EntityKind::Vehicle), 1);
    assert!(vehicle(&store, "AB12XYZ").is_some());
    let file = &report.per_file[0];
    assert_eq!(file.inserted, 1);
    assert_eq!(file.unchanged, 2);
}

#[tokio::test]
async fn test_later_row_in_file_updates_folded_vehicle() {
    let env = TestEnv::new();
    env.write_csv(
        "Vehicles.csv",
        "Registration,Make,Colour\nAB12XYZ,Ford,\nAB12 XYZ,,Blue\n",
    );
    let store = env.open_store();

    let report = run_import(env.config(), Arc::clone(&store)).await;

    let stored = vehicle(&store, "AB12XYZ").unwrap();
    assert_eq!(stored.attribute("make"), Some("Ford"));
    assert_eq!(stored.attribute("colour"), Some("Blue"));
    assert_eq!(report.per_file[0].inserted, 1);
    assert_eq!(report.per_file[0].updated, 1);
}

#[tokio::test]
async fn test_missing_registration_column_rejects_file() {
    let env = TestEnv::new();
    env.write_csv("Vehicles.csv", "Make,Model\nFord,Focus\nVauxhall,Corsa\n");
    let store = env.open_store();

    let report = run_import(env.config(), Arc::clone(&store)).await;

    assert_eq!(count_rows(&store, EntityKind::Vehicle), 0);
    let file = &report.per_file[0];
    assert_eq!(file.errors.len(), 1);
    assert_eq!(file.errors[0].row, None);
    assert!(file.errors[0].reason.contains("registration"));
    assert_eq!(file.inserted, 0);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_bad_file_does_not_stop_other_files() {
    let env = TestEnv::new();
    env.write_bytes("Customers_broken.csv", b"Name\x00,Phone\x00\n");
    env.write_csv("Customers.csv", "Forename,Surname\njane,doe\n");
    let store = env.open_store();

    let report = run_import(env.config(), Arc::clone(&store)).await;

    assert_eq!(report.files_processed, 2);
    let broken = report
        .per_file
        .iter()
        .find(|f| f.file.contains("broken"))
        .unwrap();
    assert!(broken.has_errors());
    assert_eq!(customers_named(&store, "Jane Doe").len(), 1);
}

#[tokio::test]
async fn test_windows_1252_file_is_decoded() {
    let env = TestEnv::new();
    // "José García" / "£100 credit" 的 Windows-1252 编码
    env.write_bytes(
        "customers.csv",
        b"Name;Notes\nJos\xe9 Garc\xeda;\xa3100 credit\n",
    );
    let store = env.open_store();

    let report = run_import(env.config(), Arc::clone(&store)).await;

    let file = &report.per_file[0];
    assert_eq!(file.encoding.as_deref(), Some("windows-1252"));
    assert_eq!(file.delimiter.as_deref(), Some(";"));
    assert!(!file.low_confidence);

    let stored = customers_named(&store, "José García");
    assert_eq!(stored.len(), 1);
    // 未映射列作为扩展属性保留
    assert_eq!(
        stored[0].extensions.get("Notes").map(|s| s.as_str()),
        Some("£100 credit")
    );
}

#[tokio::test]
async fn test_corrupt_money_is_warning_not_row_error() {
    let env = TestEnv::new();
    env.write_csv("Invoices.csv", &invoice_csv(1000, Some(500)));
    let store = env.open_store();

    let report = run_import(env.config(), Arc::clone(&store)).await;

    let file = &report.per_file[0];
    assert_eq!(file.inserted, 1000);
    assert!(file.errors.is_empty());
    let warning = file
        .warnings
        .iter()
        .find(|w| w.row == Some(500))
        .expect("第 500 行应有金额告警");
    assert_eq!(warning.field.as_deref(), Some("total_amount"));
    assert_eq!(count_rows(&store, EntityKind::Invoice), 1000);
}

#[tokio::test]
async fn test_failed_batch_is_retried_row_by_row() {
    logging::init_test();

    let env = TestEnv::new();
    env.write_csv("Invoices.csv", &invoice_csv(1000, None));
    let sqlite = env.open_store();
    let store = Arc::new(FaultyStore::new(Arc::clone(&sqlite)).failing_on("INV0500"));

    let report = run_import(env.config(), store).await;

    let file = &report.per_file[0];
    assert_eq!(file.inserted, 999);
    assert_eq!(file.skipped, 1);
    assert_eq!(file.errors.len(), 1);
    assert_eq!(file.errors[0].row, Some(500));
    assert_eq!(count_rows(&sqlite, EntityKind::Invoice), 999);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_reference_to_failed_customer_is_unlinked() {
    logging::init_test();

    let env = TestEnv::new();
    env.write_csv("Customers.csv", "Name\nJane Doe\n");
    env.write_csv("Vehicles.csv", "Registration,Customer\nAB12XYZ,Jane Doe\n");
    let sqlite = env.open_store();
    let store = Arc::new(FaultyStore::new(Arc::clone(&sqlite)).failing_on("jane doe"));

    let report = run_import(env.config(), store).await;

    let customers = &report.per_file[0];
    assert_eq!(customers.inserted, 0);
    assert_eq!(customers.skipped, 1);
    assert_eq!(count_rows(&sqlite, EntityKind::Customer), 0);

    // 客户未落库 → 车辆外键留空并进入人工关联清单
    let vehicles = &report.per_file[1];
    assert_eq!(vehicles.inserted, 1);
    assert_eq!(vehicles.unlinked, 1);
    let stored = vehicle(&sqlite, "AB12XYZ").expect("车辆应已写入");
    assert_eq!(stored.links.customer_id, None);
    assert_eq!(report.manual_linking.len(), 1);
    assert_eq!(report.manual_linking[0].reference, "Jane Doe");
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_resume_rewrites_row_that_failed_before_cancel() {
    logging::init_test();

    let env = TestEnv::new();
    let path = env.write_csv("Vehicles.csv", "Registration\nAA11AAA\nBB22BBB\nCC33CCC\nDD44DDD\n");
    let sqlite = env.open_store();

    // 第一次: BB22BBB 写入失败,第一个批次后取消
    let cancel = Arc::new(AtomicBool::new(false));
    let faulty = Arc::new(
        FaultyStore::new(Arc::clone(&sqlite))
            .failing_on("BB22BBB")
            .cancelling_after(1, Arc::clone(&cancel)),
    );
    let mut config = env.config();
    config.batch_size = 2;
    let first = ImportOrchestrator::new(config.clone(), faulty)
        .unwrap()
        .with_cancel_flag(cancel)
        .run_import()
        .await
        .unwrap();

    assert!(first.cancelled);
    assert_eq!(first.per_file[0].skipped, 1);
    assert_eq!(count_rows(&sqlite, EntityKind::Vehicle), 1);

    // 断点停在失败行之前
    let fingerprint = garage_import::importer::file_parser::fingerprint(&std::fs::read(&path).unwrap());
    let checkpoint = sqlite.load_checkpoint(&fingerprint).unwrap().unwrap();
    assert_eq!(checkpoint.committed_units, 1);

    // 第二次: 失败行重新写入
    let second = run_import(config, Arc::clone(&sqlite)).await;
    let file = &second.per_file[0];
    assert!(file.resumed);
    assert_eq!(file.inserted, 3);
    assert_eq!(file.unchanged, 1);
    assert_eq!(count_rows(&sqlite, EntityKind::Vehicle), 4);
    assert!(vehicle(&sqlite, "BB22BBB").is_some());
}

#[tokio::test]
async fn test_cancelled_import_resumes_from_checkpoint() {
    logging::init_test();

    let env = TestEnv::new();
    let path = env.write_csv(
        "Vehicles.csv",
        "Registration\nAA11AAA\nBB22BBB\nCC33CCC\nDD44DDD\nEE55EEE\n",
    );
    let sqlite = env.open_store();

    // 第一次: 第 2 次写入后请求取消,第一个批次仍完整提交
    let cancel = Arc::new(AtomicBool::new(false));
    let faulty = Arc::new(
        FaultyStore::new(Arc::clone(&sqlite)).cancelling_after(2, Arc::clone(&cancel)),
    );
    let mut config = env.config();
    config.batch_size = 2;
    let first = ImportOrchestrator::new(config.clone(), faulty)
        .unwrap()
        .with_cancel_flag(cancel)
        .run_import()
        .await
        .unwrap();

    assert!(first.cancelled);
    assert_eq!(first.exit_code(), 1);
    assert_eq!(count_rows(&sqlite, EntityKind::Vehicle), 2);

    let fingerprint = garage_import::importer::file_parser::fingerprint(&std::fs::read(&path).unwrap());
    let checkpoint = sqlite.load_checkpoint(&fingerprint).unwrap().unwrap();
    assert_eq!(checkpoint.committed_units, 2);
    assert!(!checkpoint.completed);

    // 第二次: 从断点继续
    let second = run_import(config, Arc::clone(&sqlite)).await;
    let file = &second.per_file[0];
    assert!(file.resumed);
    assert_eq!(file.inserted, 3);
    assert_eq!(file.unchanged, 2);
    assert_eq!(count_rows(&sqlite, EntityKind::Vehicle), 5);
    assert!(sqlite.load_checkpoint(&fingerprint).unwrap().unwrap().completed);
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let env = TestEnv::new();
    env.write_csv("Customers.csv", CUSTOMERS_CSV);
    env.write_csv("Vehicles.csv", VEHICLES_CSV);
    let store = env.open_store();

    let mut config = env.config();
    config.dry_run = true;
    let report = run_import(config, Arc::clone(&store)).await;

    assert!(report.dry_run);
    assert_eq!(report.totals.inserted, 4);
    // 预演中同一次运行的客户可被车辆引用
    assert_eq!(report.totals.unlinked, 1);
    assert_eq!(count_rows(&store, EntityKind::Customer), 0);
    assert_eq!(count_rows(&store, EntityKind::Vehicle), 0);
}

#[tokio::test]
async fn test_same_name_customers_use_first_created_and_flag_collision() {
    let env = TestEnv::new();
    env.write_csv("Customers.csv", "ID,Name\nC1,John Smith\nC2,John Smith\n");
    env.write_csv("Vehicles.csv", "Registration,Owner\nAB12XYZ,John Smith\n");
    let store = env.open_store();

    let report = run_import(env.config(), Arc::clone(&store)).await;

    let johns = customers_named(&store, "John Smith");
    assert_eq!(johns.len(), 2);

    let stored = vehicle(&store, "AB12XYZ").unwrap();
    assert_eq!(stored.links.customer_id, johns[0].id);

    let vehicles = &report.per_file[1];
    assert!(vehicles
        .warnings
        .iter()
        .any(|w| w.message.starts_with("collision")));
    assert_eq!(report.manual_linking.len(), 1);
    assert_eq!(report.manual_linking[0].entity_kind, EntityKind::Vehicle);
}

#[tokio::test]
async fn test_external_ids_link_across_files() {
    let env = TestEnv::new();
    env.write_csv("Customers.csv", "_ID,Forename,Surname\n17,Jane,Doe\n");
    env.write_csv("Vehicles.csv", "_ID_Customer,Registration\n17,AB12XYZ\n");
    let store = env.open_store();

    run_import(env.config(), Arc::clone(&store)).await;

    let jane = customers_named(&store, "Jane Doe");
    assert_eq!(jane[0].external_id.as_deref(), Some("17"));
    assert_eq!(vehicle(&store, "AB12XYZ").unwrap().links.customer_id, jane[0].id);
}

#[tokio::test]
async fn test_configured_synonym_maps_header() {
    let env = TestEnv::new();
    env.write_csv("Vehicles.csv", "Kennzeichen,Make\nAB12XYZ,Ford\n");
    let store = env.open_store();

    let manager = ConfigManager::from_connection(store.connection()).unwrap();
    manager
        .set_global_config_value(
            &config_keys::synonyms_key(EntityKind::Vehicle),
            r#"{"Kennzeichen": "registration"}"#,
        )
        .unwrap();

    let config = env
        .config()
        .resolve(&manager, &ConfigOverrides::default())
        .await
        .unwrap();
    run_import(config, Arc::clone(&store)).await;

    assert!(vehicle(&store, "AB12XYZ").is_some());
}

#[tokio::test]
async fn test_invalid_root_is_fatal() {
    let env = TestEnv::new();
    let mut config = env.config();
    config.root_dir = env.root().join("missing");

    let err = ImportOrchestrator::new(config, env.open_store())
        .unwrap()
        .run_import()
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::InvalidRoot(_)));
    assert!(err.is_fatal());
}
