// ==========================================
// 圣徒档案导入系统 - 表格数据源
// ==========================================
// 职责: 从外部表格读取页签原始行，并冻结为 SourceSnapshot
// 实现:
// - CsvTabSource:      <root>/<sheet_id>/<tab>.csv
// - WorkbookTabSource: <root>/<sheet_id>.xlsx（工作表 = 页签）
// - InMemoryTabSource: 测试 / 嵌入调用
// - RateLimitedSource: 任意数据源外层的固定间隔限速（状态归属实例）
// ==========================================

use crate::domain::workflow::{LocationSheet, RawTab, SheetTab, SourceSnapshot};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::process_locations_tab;
use crate::importer::file_parser::{CsvParser, ExcelParser};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

// ==========================================
// TabSource Trait
// ==========================================
#[async_trait]
pub trait TabSource: Send + Sync {
    /// 列出表格中的页签名（保持源顺序）
    async fn list_tabs(&self, sheet_id: &str) -> ImportResult<Vec<String>>;

    /// 读取页签全部行（第 0 行为表头）
    async fn read_tab(&self, sheet_id: &str, tab: &str) -> ImportResult<Vec<Vec<String>>>;
}

async fn run_blocking<T, F>(f: F) -> ImportResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ImportResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ImportError::InternalError(format!("读取任务异常: {}", e)))?
}

// ==========================================
// CsvTabSource
// ==========================================
pub struct CsvTabSource {
    root: PathBuf,
}

impl CsvTabSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sheet_dir(&self, sheet_id: &str) -> PathBuf {
        self.root.join(sheet_id)
    }
}

#[async_trait]
impl TabSource for CsvTabSource {
    async fn list_tabs(&self, sheet_id: &str) -> ImportResult<Vec<String>> {
        let dir = self.sheet_dir(sheet_id);
        if !dir.is_dir() {
            return Err(ImportError::SheetNotFound(sheet_id.to_string()));
        }

        run_blocking(move || {
            let mut names = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                let is_csv = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false);
                if let (true, Some(stem)) = (is_csv, path.file_stem().and_then(|s| s.to_str())) {
                    names.push(stem.to_string());
                }
            }
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn read_tab(&self, sheet_id: &str, tab: &str) -> ImportResult<Vec<Vec<String>>> {
        let path = self.sheet_dir(sheet_id).join(format!("{}.csv", tab));
        if !path.exists() {
            return Err(ImportError::TabNotFound {
                sheet_id: sheet_id.to_string(),
                tab: tab.to_string(),
            });
        }
        run_blocking(move || CsvParser.read_rows(&path)).await
    }
}

// ==========================================
// WorkbookTabSource
// ==========================================
pub struct WorkbookTabSource {
    root: PathBuf,
}

impl WorkbookTabSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn workbook_path(&self, sheet_id: &str) -> ImportResult<PathBuf> {
        ["xlsx", "xls", "ods"]
            .iter()
            .map(|ext| self.root.join(format!("{}.{}", sheet_id, ext)))
            .find(|p| p.exists())
            .ok_or_else(|| ImportError::SheetNotFound(sheet_id.to_string()))
    }

    async fn read_workbook(&self, sheet_id: &str) -> ImportResult<Vec<RawTab>> {
        let path = self.workbook_path(sheet_id)?;
        run_blocking(move || ExcelParser.read_sheets(&path)).await
    }
}

#[async_trait]
impl TabSource for WorkbookTabSource {
    async fn list_tabs(&self, sheet_id: &str) -> ImportResult<Vec<String>> {
        Ok(self
            .read_workbook(sheet_id)
            .await?
            .into_iter()
            .map(|t| t.name)
            .collect())
    }

    async fn read_tab(&self, sheet_id: &str, tab: &str) -> ImportResult<Vec<Vec<String>>> {
        self.read_workbook(sheet_id)
            .await?
            .into_iter()
            .find(|t| t.name == tab)
            .map(|t| t.rows)
            .ok_or_else(|| ImportError::TabNotFound {
                sheet_id: sheet_id.to_string(),
                tab: tab.to_string(),
            })
    }
}

// ==========================================
// InMemoryTabSource
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct InMemoryTabSource {
    sheets: HashMap<String, Vec<RawTab>>,
}

impl InMemoryTabSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, sheet_id: impl Into<String>, tabs: Vec<RawTab>) -> Self {
        self.sheets.insert(sheet_id.into(), tabs);
        self
    }
}

#[async_trait]
impl TabSource for InMemoryTabSource {
    async fn list_tabs(&self, sheet_id: &str) -> ImportResult<Vec<String>> {
        self.sheets
            .get(sheet_id)
            .map(|tabs| tabs.iter().map(|t| t.name.clone()).collect())
            .ok_or_else(|| ImportError::SheetNotFound(sheet_id.to_string()))
    }

    async fn read_tab(&self, sheet_id: &str, tab: &str) -> ImportResult<Vec<Vec<String>>> {
        let tabs = self
            .sheets
            .get(sheet_id)
            .ok_or_else(|| ImportError::SheetNotFound(sheet_id.to_string()))?;
        tabs.iter()
            .find(|t| t.name == tab)
            .map(|t| t.rows.clone())
            .ok_or_else(|| ImportError::TabNotFound {
                sheet_id: sheet_id.to_string(),
                tab: tab.to_string(),
            })
    }
}

// ==========================================
// RateLimitedSource - 固定间隔限速
// ==========================================
// 相邻两次调用之间至少间隔 delay
pub struct RateLimitedSource<S> {
    inner: S,
    delay: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl<S: TabSource> RateLimitedSource<S> {
    pub fn new(inner: S, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            last_call: Mutex::new(None),
        }
    }

    async fn throttle(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.delay {
                let wait = self.delay - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "数据源限速等待");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl<S: TabSource> TabSource for RateLimitedSource<S> {
    async fn list_tabs(&self, sheet_id: &str) -> ImportResult<Vec<String>> {
        self.throttle().await;
        self.inner.list_tabs(sheet_id).await
    }

    async fn read_tab(&self, sheet_id: &str, tab: &str) -> ImportResult<Vec<Vec<String>>> {
        self.throttle().await;
        self.inner.read_tab(sheet_id, tab).await
    }
}

// ==========================================
// SnapshotLoader - 读取主表与门店表，冻结为快照
// ==========================================
pub struct SnapshotLoader<'a, S: TabSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: TabSource + ?Sized> SnapshotLoader<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// 读取完整快照
    ///
    /// # 流程
    /// 1. 主表全部页签 = 门店状态页签
    /// 2. 映射门店行，收集 sheet_id（去重，保持首次出现顺序）
    /// 3. 逐个读取门店表的 Saints / Historical / Milestones 页签
    ///
    /// 门店表不存在时记录空表（由 verify 阶段报告缺失页签）
    #[instrument(skip(self))]
    pub async fn load(&self, master_sheet_id: &str) -> ImportResult<SourceSnapshot> {
        let mut location_tabs = Vec::new();
        for tab in self.source.list_tabs(master_sheet_id).await? {
            let rows = self.source.read_tab(master_sheet_id, &tab).await?;
            location_tabs.push(RawTab::new(tab, rows));
        }

        let mut seen = HashSet::new();
        let sheet_ids: Vec<String> = location_tabs
            .iter()
            .flat_map(|tab| process_locations_tab(&tab.name, &tab.rows).records)
            .map(|loc| loc.sheet_id)
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let mut location_sheets = Vec::with_capacity(sheet_ids.len());
        for sheet_id in sheet_ids {
            location_sheets.push(self.load_location_sheet(&sheet_id).await?);
        }

        info!(
            master_sheet_id,
            location_tabs = location_tabs.len(),
            location_sheets = location_sheets.len(),
            "源数据快照读取完成"
        );

        Ok(SourceSnapshot {
            master_sheet_id: master_sheet_id.to_string(),
            location_tabs,
            location_sheets,
            captured_at: Utc::now(),
        })
    }

    async fn load_location_sheet(&self, sheet_id: &str) -> ImportResult<LocationSheet> {
        let tab_names = match self.source.list_tabs(sheet_id).await {
            Ok(names) => names,
            Err(ImportError::SheetNotFound(_)) => {
                warn!(sheet_id, "门店表格不存在");
                return Ok(LocationSheet {
                    sheet_id: sheet_id.to_string(),
                    tabs: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let wanted: Vec<&String> = SheetTab::ALL
            .iter()
            .filter_map(|kind| tab_names.iter().find(|name| kind.matches(name)))
            .collect();

        let reads = wanted
            .iter()
            .map(|name| self.source.read_tab(sheet_id, name.as_str()));
        let rows = futures::future::try_join_all(reads).await?;

        let tabs = wanted
            .into_iter()
            .zip(rows)
            .map(|(name, rows)| RawTab::new(name.clone(), rows))
            .collect();

        Ok(LocationSheet {
            sheet_id: sheet_id.to_string(),
            tabs,
        })
    }
}

/// 从数据源根目录推断实现（目录 → CSV，否则 → 工作簿）
pub fn source_for_path(root: &Path) -> Box<dyn TabSource> {
    let has_workbooks = std::fs::read_dir(root)
        .map(|entries| {
            entries.filter_map(Result::ok).any(|e| {
                e.path()
                    .extension()
                    .and_then(|x| x.to_str())
                    .map(|x| matches!(x.to_lowercase().as_str(), "xlsx" | "xls" | "ods"))
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false);

    if has_workbooks {
        Box::new(WorkbookTabSource::new(root))
    } else {
        Box::new(CsvTabSource::new(root))
    }
}

#[async_trait]
impl TabSource for Box<dyn TabSource> {
    async fn list_tabs(&self, sheet_id: &str) -> ImportResult<Vec<String>> {
        (**self).list_tabs(sheet_id).await
    }

    async fn read_tab(&self, sheet_id: &str, tab: &str) -> ImportResult<Vec<Vec<String>>> {
        (**self).read_tab(sheet_id, tab).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(name: &str, rows: &[&[&str]]) -> RawTab {
        RawTab::new(
            name,
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn source() -> InMemoryTabSource {
        InMemoryTabSource::new()
            .with_sheet(
                "master",
                vec![tab(
                    "Open",
                    &[
                        &["State", "City", "Address", "Sheet ID"],
                        &["TX", "Austin", "1 Main", "loc-1"],
                        &["TX", "Austin", "1 Main", "loc-1"],
                        &["TX", "Dallas", "2 Elm", "loc-missing"],
                    ],
                )],
            )
            .with_sheet(
                "loc-1",
                vec![
                    tab("Saints", &[&["Saint Number"]]),
                    tab("Notes", &[&["x"]]),
                    tab("Milestones", &[&["Saint Number"]]),
                ],
            )
    }

    #[tokio::test]
    async fn test_snapshot_loader_collects_sheets() {
        let src = source();
        let snapshot = SnapshotLoader::new(&src).load("master").await.unwrap();

        assert_eq!(snapshot.location_tabs.len(), 1);
        assert_eq!(snapshot.location_sheets.len(), 2);

        let loc1 = snapshot.sheet("loc-1").unwrap();
        assert!(loc1.tab(SheetTab::Saints).is_some());
        assert!(loc1.tab(SheetTab::Historical).is_none());
        assert_eq!(loc1.tabs.len(), 2);

        assert!(snapshot.sheet("loc-missing").unwrap().tabs.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_source_spaces_calls() {
        let src = RateLimitedSource::new(source(), Duration::from_millis(30));
        let started = Instant::now();
        src.list_tabs("master").await.unwrap();
        src.list_tabs("loc-1").await.unwrap();
        src.read_tab("loc-1", "Saints").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_missing_tab_is_error() {
        let src = source();
        let err = src.read_tab("loc-1", "Historical").await.unwrap_err();
        assert!(matches!(err, ImportError::TabNotFound { .. }));
    }
}
