//! Discovery of the most recent reporting-period archives.
//!
//! The regulator has published the corpus in two shapes over the years:
//!
//! ```text
//! flat:    <root>/2024/1T2024.zip, <root>/2024/2T2024.zip, ...
//! nested:  <root>/2025/1/1T2025.zip, <root>/2025/2/2T2025.zip, ...
//! ```
//!
//! The layout is probed per year from the year listing itself.

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::Url;
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::listing::{entry_name, is_directory, resolve, ListingSource};

static YEAR_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}$").expect("static year pattern"));
static QUARTER_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-4]$").expect("static quarter pattern"));

/// A downloadable archive found in the corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRef {
    pub url: Url,
    pub filename: String,
}

/// How a single year folder is organised.
#[derive(Debug, PartialEq, Eq)]
pub enum YearLayout {
    /// Archives sit directly in the year folder, newest first.
    Flat(Vec<ArchiveRef>),
    /// One sub-folder per quarter, newest first.
    Nested(Vec<Url>),
}

impl YearLayout {
    /// Decide the layout from a year listing. Direct archives win; quarter
    /// folders are only considered when there are none.
    pub fn probe(year_url: &Url, hrefs: &[String]) -> Result<Self> {
        let archives = archive_links(year_url, hrefs)?;
        if !archives.is_empty() {
            return Ok(YearLayout::Flat(archives));
        }

        let mut quarters: Vec<(&str, &String)> = hrefs
            .iter()
            .filter(|href| is_directory(href))
            .map(|href| (entry_name(href), href))
            .filter(|(name, _)| QUARTER_DIR.is_match(name))
            .collect();
        quarters.sort_by(|a, b| b.0.cmp(a.0));
        quarters.dedup_by(|a, b| a.0 == b.0);

        let urls = quarters
            .into_iter()
            .map(|(_, href)| resolve(year_url, href))
            .collect::<Result<Vec<_>>>()?;
        Ok(YearLayout::Nested(urls))
    }

    /// Gather archives for this year. The nested layout stops descending into
    /// further quarters once `wanted` archives are in hand.
    pub async fn collect<S: ListingSource>(
        self,
        source: &S,
        wanted: usize,
    ) -> Result<Vec<ArchiveRef>> {
        match self {
            YearLayout::Flat(archives) => Ok(archives),
            YearLayout::Nested(quarters) => {
                let mut found = Vec::new();
                for quarter_url in quarters {
                    if found.len() >= wanted {
                        break;
                    }
                    let hrefs = source
                        .list(&quarter_url)
                        .await
                        .with_context(|| format!("Failed to list quarter folder {}", quarter_url))?;
                    found.extend(archive_links(&quarter_url, &hrefs)?);
                }
                Ok(found)
            }
        }
    }
}

/// Zip links in a listing, sorted descending by filename (filenames embed the
/// quarter, so this puts the latest period first).
pub fn archive_links(base: &Url, hrefs: &[String]) -> Result<Vec<ArchiveRef>> {
    let mut archives = hrefs
        .iter()
        .filter(|href| !is_directory(href))
        .filter(|href| entry_name(href).to_lowercase().ends_with(".zip"))
        .map(|href| {
            Ok(ArchiveRef {
                url: resolve(base, href)?,
                filename: entry_name(href).to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    archives.sort_by(|a, b| b.filename.cmp(&a.filename));
    archives.dedup_by(|a, b| a.filename == b.filename);
    Ok(archives)
}

/// Year folders of the root listing, newest first.
fn year_folders(root: &Url, hrefs: &[String]) -> Result<Vec<(String, Url)>> {
    let mut years = hrefs
        .iter()
        .filter(|href| is_directory(href))
        .filter(|href| YEAR_DIR.is_match(entry_name(href)))
        .map(|href| Ok((entry_name(href).to_string(), resolve(root, href)?)))
        .collect::<Result<Vec<_>>>()?;
    years.sort_by(|a, b| b.0.cmp(&a.0));
    years.dedup_by(|a, b| a.0 == b.0);
    Ok(years)
}

/// Locate up to `count` archives for the most recent reporting periods.
///
/// Any listing failure is fatal: partial discovery would silently change
/// which periods a run covers.
pub async fn locate_archives<S: ListingSource>(
    source: &S,
    root: &Url,
    count: usize,
) -> Result<Vec<ArchiveRef>> {
    info!(%root, count, "discovering reporting periods");
    let root_hrefs = source
        .list(root)
        .await
        .with_context(|| format!("Failed to list corpus root {}", root))?;

    let years = year_folders(root, &root_hrefs)?;
    info!(years = years.len(), "year folders found");

    let mut collected: Vec<ArchiveRef> = Vec::new();
    for (year, year_url) in years {
        if collected.len() >= count {
            break;
        }

        let hrefs = source
            .list(&year_url)
            .await
            .with_context(|| format!("Failed to list year folder {}", year_url))?;

        let layout = YearLayout::probe(&year_url, &hrefs)?;
        match &layout {
            YearLayout::Flat(archives) => {
                info!(year = %year, archives = archives.len(), "flat year layout")
            }
            YearLayout::Nested(quarters) if quarters.is_empty() => {
                warn!(year = %year, "year folder has neither archives nor quarter folders")
            }
            YearLayout::Nested(quarters) => {
                info!(year = %year, quarters = quarters.len(), "nested year layout")
            }
        }

        let wanted = count - collected.len();
        collected.extend(layout.collect(source, wanted).await?);
    }

    collected.truncate(count);
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const ROOT: &str = "https://example.test/pda/";

    /// In-memory listings keyed by URL, recording every request.
    struct FakeListing {
        pages: HashMap<String, Vec<String>>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeListing {
        fn new(pages: &[(&str, &[&str])]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, hrefs)| {
                        (
                            url.to_string(),
                            hrefs.iter().map(|h| h.to_string()).collect(),
                        )
                    })
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl ListingSource for FakeListing {
        async fn list(&self, url: &Url) -> Result<Vec<String>> {
            self.requests.lock().unwrap().push(url.to_string());
            self.pages
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| anyhow!("404 Not Found: {}", url))
        }
    }

    fn root() -> Url {
        Url::parse(ROOT).unwrap()
    }

    fn filenames(archives: &[ArchiveRef]) -> Vec<&str> {
        archives.iter().map(|a| a.filename.as_str()).collect()
    }

    // -------------------------------------------------------------------------
    // LAYOUT PROBE
    // -------------------------------------------------------------------------

    #[test]
    fn test_probe_flat_sorts_descending() {
        let year = Url::parse("https://example.test/pda/2024/").unwrap();
        let hrefs: Vec<String> = ["../", "1T2024.zip", "3T2024.zip", "2T2024.ZIP", "leiame.txt"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match YearLayout::probe(&year, &hrefs).unwrap() {
            YearLayout::Flat(archives) => {
                assert_eq!(filenames(&archives), vec!["3T2024.zip", "2T2024.ZIP", "1T2024.zip"]);
                assert_eq!(
                    archives[0].url.as_str(),
                    "https://example.test/pda/2024/3T2024.zip"
                );
            }
            other => panic!("expected flat layout, got {:?}", other),
        }
    }

    #[test]
    fn test_probe_nested_keeps_only_quarter_folders() {
        let year = Url::parse("https://example.test/pda/2025/").unwrap();
        let hrefs: Vec<String> = ["../", "1/", "3/", "2/", "5/", "extra/", "12/"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let layout = YearLayout::probe(&year, &hrefs).unwrap();
        assert_eq!(
            layout,
            YearLayout::Nested(vec![
                Url::parse("https://example.test/pda/2025/3/").unwrap(),
                Url::parse("https://example.test/pda/2025/2/").unwrap(),
                Url::parse("https://example.test/pda/2025/1/").unwrap(),
            ])
        );
    }

    #[test]
    fn test_probe_prefers_direct_archives_over_quarters() {
        let year = Url::parse("https://example.test/pda/2023/").unwrap();
        let hrefs: Vec<String> = ["1/", "4T2023.zip"].iter().map(|s| s.to_string()).collect();
        assert!(matches!(
            YearLayout::probe(&year, &hrefs).unwrap(),
            YearLayout::Flat(_)
        ));
    }

    #[test]
    fn test_probe_empty_year_is_empty_nested() {
        let year = Url::parse("https://example.test/pda/2019/").unwrap();
        let hrefs = vec!["../".to_string(), "leiame.txt".to_string()];
        assert_eq!(
            YearLayout::probe(&year, &hrefs).unwrap(),
            YearLayout::Nested(vec![])
        );
    }

    // -------------------------------------------------------------------------
    // DISCOVERY
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_nested_year_satisfies_request_before_older_years() {
        let source = FakeListing::new(&[
            (ROOT, &["../", "2023/", "2025/", "2024/"]),
            ("https://example.test/pda/2025/", &["../", "4/", "3/"]),
            ("https://example.test/pda/2025/4/", &["../", "4T2025.zip"]),
            ("https://example.test/pda/2025/3/", &["../", "3T2025.zip"]),
            ("https://example.test/pda/2024/", &["4T2024.zip"]),
        ]);

        let archives = locate_archives(&source, &root(), 2).await.unwrap();

        assert_eq!(filenames(&archives), vec!["4T2025.zip", "3T2025.zip"]);
        assert!(!source
            .requested()
            .iter()
            .any(|url| url.starts_with("https://example.test/pda/2024/")));
    }

    #[tokio::test]
    async fn test_default_three_periods_span_years_and_layouts() {
        let source = FakeListing::new(&[
            (ROOT, &["2024/", "2025/"]),
            ("https://example.test/pda/2025/", &["1/"]),
            ("https://example.test/pda/2025/1/", &["1T2025.zip"]),
            (
                "https://example.test/pda/2024/",
                &["1T2024.zip", "2T2024.zip", "3T2024.zip", "4T2024.zip"],
            ),
        ]);

        let archives = locate_archives(&source, &root(), 3).await.unwrap();

        assert_eq!(
            filenames(&archives),
            vec!["1T2025.zip", "4T2024.zip", "3T2024.zip"]
        );
    }

    #[tokio::test]
    async fn test_stops_descending_quarters_once_satisfied() {
        let source = FakeListing::new(&[
            (ROOT, &["2025/"]),
            ("https://example.test/pda/2025/", &["1/", "2/", "3/"]),
            ("https://example.test/pda/2025/3/", &["3T2025.zip"]),
            ("https://example.test/pda/2025/2/", &["2T2025.zip"]),
            ("https://example.test/pda/2025/1/", &["1T2025.zip"]),
        ]);

        let archives = locate_archives(&source, &root(), 1).await.unwrap();

        assert_eq!(filenames(&archives), vec!["3T2025.zip"]);
        assert!(!source
            .requested()
            .contains(&"https://example.test/pda/2025/2/".to_string()));
    }

    #[tokio::test]
    async fn test_fewer_archives_than_requested() {
        let source = FakeListing::new(&[
            (ROOT, &["2024/"]),
            ("https://example.test/pda/2024/", &["1T2024.zip"]),
        ]);

        let archives = locate_archives(&source, &root(), 3).await.unwrap();
        assert_eq!(filenames(&archives), vec!["1T2024.zip"]);
    }

    #[tokio::test]
    async fn test_root_failure_is_fatal() {
        let source = FakeListing::new(&[]);
        let err = locate_archives(&source, &root(), 3).await.unwrap_err();
        assert!(err.to_string().contains("corpus root"));
    }

    #[tokio::test]
    async fn test_year_subfetch_failure_is_fatal() {
        let source = FakeListing::new(&[(ROOT, &["2025/", "2024/"])]);
        let err = locate_archives(&source, &root(), 3).await.unwrap_err();
        assert!(err.to_string().contains("year folder"));
    }

    #[tokio::test]
    async fn test_quarter_subfetch_failure_is_fatal() {
        let source = FakeListing::new(&[
            (ROOT, &["2025/"]),
            ("https://example.test/pda/2025/", &["2/", "1/"]),
            ("https://example.test/pda/2025/2/", &["2T2025.zip"]),
        ]);
        let err = locate_archives(&source, &root(), 3).await.unwrap_err();
        assert!(err.to_string().contains("quarter folder"));
    }

    #[tokio::test]
    async fn test_absolute_path_hrefs() {
        let source = FakeListing::new(&[
            (ROOT, &["/pda/2024/"]),
            ("https://example.test/pda/2024/", &["/pda/2024/2T2024.zip"]),
        ]);

        let archives = locate_archives(&source, &root(), 3).await.unwrap();
        assert_eq!(archives[0].filename, "2T2024.zip");
        assert_eq!(
            archives[0].url.as_str(),
            "https://example.test/pda/2024/2T2024.zip"
        );
    }
}
