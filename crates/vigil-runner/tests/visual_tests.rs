mod common;

use common::{png, FakeBrowser, PageScript};
use std::sync::Arc;
use tempfile::TempDir;
use vigil_core::{StepFailure, VigilError};
use vigil_runner::{FileStore, VisualTestService};
use vigil_visual::{FsArtifactStore, VisualComparator, VisualStatus};

fn service(dir: &TempDir, browser: &FakeBrowser) -> (VisualTestService, Arc<VisualComparator>) {
    let comparator = Arc::new(VisualComparator::new(Arc::new(FsArtifactStore::new(
        dir.path().join("visual"),
    ))));
    let service = VisualTestService::new(
        Arc::new(FileStore::new(dir.path().join("data"))),
        Arc::new(browser.clone()),
        comparator.clone(),
    );
    (service, comparator)
}

#[tokio::test]
async fn test_create_run_approve_rerun() {
    let temp = TempDir::new().unwrap();
    let browser = FakeBrowser::new(PageScript::default());
    let (service, comparator) = service(&temp, &browser);

    let test = service
        .create("p1", "Landing", "https://example.test")
        .await
        .unwrap();

    let first = service.run(&test.id).await.unwrap();
    assert!(!first.has_baseline);
    assert_eq!(first.id, test.artifact_id());
    assert!(browser.calls().contains(&"goto https://example.test".to_string()));
    assert_eq!(browser.closed(), 1);

    service.approve(&test.id).await.unwrap();
    let second = service.run(&test.id).await.unwrap();
    assert!(second.is_clean());

    browser.page.set_screenshot(Some(png(16, 16, [10, 10, 10, 255])));
    let third = service.run(&test.id).await.unwrap();
    assert!(third.has_baseline);
    assert!(third.diff_percentage > 99.0);

    let report = comparator.report(&test.artifact_id()).await.unwrap().unwrap();
    assert_eq!(report.status, VisualStatus::Changed);

    let paths = service.images(&test.id).await.unwrap().unwrap();
    assert!(paths.baseline.exists());
    assert!(paths.latest.exists());
    assert!(paths.diff.exists());
}

#[tokio::test]
async fn test_create_requires_url() {
    let temp = TempDir::new().unwrap();
    let (service, _) = service(&temp, &FakeBrowser::default());

    let result = service.create("p1", "Blank", "  ").await;
    assert!(matches!(result, Err(VigilError::InvalidScript(_))));
    assert!(service.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_by_project() {
    let temp = TempDir::new().unwrap();
    let (service, _) = service(&temp, &FakeBrowser::default());

    service.create("p1", "A", "https://a.test").await.unwrap();
    service.create("p2", "B", "https://b.test").await.unwrap();

    assert_eq!(service.list(None).await.unwrap().len(), 2);
    let p2 = service.list(Some("p2")).await.unwrap();
    assert_eq!(p2.len(), 1);
    assert_eq!(p2[0].name, "B");
}

#[tokio::test]
async fn test_unknown_test() {
    let temp = TempDir::new().unwrap();
    let (service, _) = service(&temp, &FakeBrowser::default());

    assert!(matches!(
        service.run("nope").await,
        Err(VigilError::VisualTestNotFound(_))
    ));
    assert!(matches!(
        service.approve("nope").await,
        Err(VigilError::VisualTestNotFound(_))
    ));
    assert!(!service.delete("nope").await.unwrap());
}

#[tokio::test]
async fn test_approve_before_any_run() {
    let temp = TempDir::new().unwrap();
    let (service, _) = service(&temp, &FakeBrowser::default());
    let test = service.create("p1", "Fresh", "https://example.test").await.unwrap();

    assert!(matches!(
        service.approve(&test.id).await,
        Err(VigilError::NothingToApprove(_))
    ));
}

#[tokio::test]
async fn test_navigation_failure_closes_session() {
    let temp = TempDir::new().unwrap();
    let browser = FakeBrowser::new(PageScript {
        goto_failure: Some(StepFailure::timeout("Navigation timeout of 30000 ms exceeded")),
        ..PageScript::default()
    });
    let (service, comparator) = service(&temp, &browser);
    let test = service.create("p1", "Slow", "https://slow.test").await.unwrap();

    let result = service.run(&test.id).await;
    assert!(matches!(result, Err(VigilError::Step(_))));
    assert_eq!(browser.closed(), 1);
    assert!(!comparator.has_baseline(&test.artifact_id()).await.unwrap());
}

#[tokio::test]
async fn test_delete_purges_artifacts() {
    let temp = TempDir::new().unwrap();
    let browser = FakeBrowser::new(PageScript::default());
    let (service, _) = service(&temp, &browser);
    let test = service.create("p1", "Gone", "https://example.test").await.unwrap();

    service.run(&test.id).await.unwrap();
    service.approve(&test.id).await.unwrap();
    let paths = service.images(&test.id).await.unwrap().unwrap();
    assert!(paths.baseline.exists());

    assert!(service.delete(&test.id).await.unwrap());
    assert!(!paths.baseline.exists());
    assert!(!paths.latest.exists());
    assert!(service.list(None).await.unwrap().is_empty());
}
