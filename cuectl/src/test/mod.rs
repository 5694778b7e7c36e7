//! End-to-end pipeline tests against the scripted provider.
use std::time::Duration;

use crate::asset::AssetState;
use crate::config::{ApiKey, Config, ProviderConfig};
use crate::errors::{ApiError, Error};
use crate::generation::{ContentSource, Query};
use crate::test_utils::{MockCall, MockProvider, write_document};
use crate::Application;

fn test_config() -> Config {
    Config {
        provider: ProviderConfig {
            api_key: Some(ApiKey::new("test-key")),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn output_lines(out: &[u8]) -> Vec<String> {
    String::from_utf8(out.to_vec()).unwrap().lines().map(str::to_string).collect()
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_document_processed_and_queries_printed_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(&dir, "Okta_SOC2.pdf");
    let mock = MockProvider::new();
    mock.push_states([AssetState::Processing, AssetState::Processing, AssetState::Active]);
    mock.push_generation(Ok("Deviation: CC7.2 alert review not evidenced".into()));
    mock.push_generation(Ok("CUEC: customers must review access quarterly".into()));

    let app = Application::with_provider(test_config(), mock.clone());
    let mut out = Vec::new();
    let results = app.run(&path, &mut out).await.unwrap();

    assert_eq!(
        output_lines(&out),
        vec![
            "Deviation: CC7.2 alert review not evidenced",
            "CUEC: customers must review access quarterly"
        ]
    );
    assert_eq!(results.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["deviations", "cuecs"]);
    assert_eq!(mock.upload_count(), 1);
    assert_eq!(mock.poll_count(), 3);

    let requests = mock.generate_requests();
    assert_eq!(requests[0].prompt, "Find all control deviations...");
    assert_eq!(requests[1].prompt, "List all CUECs...");
    assert!(requests.iter().all(|r| r.model == "models/gemini-2.5-flash"));
    assert!(
        requests
            .iter()
            .all(|r| r.system_instruction.as_deref() == Some("You are a SOC Audit extraction expert."))
    );

    // Uploaded file is removed once the run is over
    assert_eq!(mock.deleted_files().len(), 1);
    assert!(mock.deleted_caches().is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_failed_processing_issues_no_queries() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(&dir, "Okta_SOC2.pdf");
    let mock = MockProvider::new();
    mock.push_states([AssetState::Processing, AssetState::Failed]);

    let app = Application::with_provider(test_config(), mock.clone());
    let mut out = Vec::new();
    let err = app.run(&path, &mut out).await.unwrap_err();

    assert!(matches!(err, Error::AssetFailed { .. }), "{err:?}");
    assert!(out.is_empty());
    assert!(mock.generate_requests().is_empty());
    assert_eq!(mock.deleted_files().len(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_poll_bound_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(&dir, "Okta_SOC2.pdf");
    let mock = MockProvider::new();

    let mut config = test_config();
    config.poll.max_polls = Some(3);
    let app = Application::with_provider(config, mock.clone());
    let err = app.run(&path, &mut Vec::new()).await.unwrap_err();

    assert!(matches!(err, Error::PollTimeout { attempts: 3, .. }), "{err:?}");
    assert_eq!(mock.poll_count(), 3);
    assert!(mock.generate_requests().is_empty());
    assert_eq!(mock.deleted_files().len(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_cached_run_routes_queries_through_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(&dir, "Okta_SOC2.pdf");
    let mock = MockProvider::new();
    mock.push_states([AssetState::Active]);

    let mut config = test_config();
    config.cache.enabled = true;
    config.cache.display_name = "okta_soc_cache".into();
    let app = Application::with_provider(config, mock.clone());
    app.run(&path, &mut Vec::new()).await.unwrap();

    let calls = mock.calls();
    let cache_request = calls
        .iter()
        .find_map(|c| match c {
            MockCall::CreateCache(request) => Some(request.clone()),
            _ => None,
        })
        .expect("cache should have been created");
    assert_eq!(cache_request.display_name, "okta_soc_cache");
    assert_eq!(cache_request.ttl, Duration::from_secs(600));
    assert_eq!(cache_request.system_instruction.as_deref(), Some("You are a SOC Audit extraction expert."));

    let requests = mock.generate_requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert!(matches!(request.source, ContentSource::Cached { .. }));
        assert_eq!(request.system_instruction, None);
    }

    // Cache goes before the file it was built from
    let deletions: Vec<_> = calls
        .iter()
        .filter(|c| matches!(c, MockCall::Delete { .. } | MockCall::DeleteCache { .. }))
        .collect();
    assert!(matches!(deletions[..], [MockCall::DeleteCache { .. }, MockCall::Delete { .. }]));
    let deleted = mock.deleted_caches();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].starts_with("cachedContents/"), "{deleted:?}");
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_cleanup_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(&dir, "Okta_SOC2.pdf");
    let mock = MockProvider::new();
    mock.push_states([AssetState::Active]);

    let mut config = test_config();
    config.cleanup.delete_remote = false;
    config.queries = vec![Query::new("only", "Summarize the auditor's opinion.")];
    let app = Application::with_provider(config, mock.clone());
    let mut out = Vec::new();
    app.run(&path, &mut out).await.unwrap();

    assert_eq!(output_lines(&out), vec!["response to: Summarize the auditor's opinion."]);
    assert!(mock.deleted_files().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_missing_document_never_reaches_provider() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockProvider::new();

    let app = Application::with_provider(test_config(), mock.clone());
    let err = app.run(&dir.path().join("absent.pdf"), &mut Vec::new()).await.unwrap_err();

    assert!(matches!(err, Error::Io { .. }), "{err:?}");
    assert!(mock.calls().is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_rejected_key_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(&dir, "Okta_SOC2.pdf");
    let mock = MockProvider::new();
    mock.push_poll_error(ApiError::Status {
        status: 400,
        message: "API key not valid. Please pass a valid API key.".into(),
        reason: Some("API_KEY_INVALID".into()),
    });

    let app = Application::with_provider(test_config(), mock.clone());
    let err = app.run(&path, &mut Vec::new()).await.unwrap_err();

    assert!(matches!(err, Error::Auth { status: 400, .. }), "{err:?}");
    assert_eq!(mock.poll_count(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_shutdown_interrupts_wait_and_still_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(&dir, "Okta_SOC2.pdf");
    let mock = MockProvider::new();

    let app = Application::with_provider(test_config(), mock.clone());
    let shutdown = tokio::time::sleep(Duration::from_secs(5));
    let err = app.run_until(&path, &mut Vec::new(), shutdown).await.unwrap_err();

    assert!(matches!(err, Error::Interrupted), "{err:?}");
    assert_eq!(mock.upload_count(), 1);
    assert!(mock.generate_requests().is_empty());
    assert_eq!(mock.deleted_files().len(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_shutdown_during_upload_still_deletes_uploaded_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(&dir, "Okta_SOC2.pdf");
    let mock = MockProvider::new();

    // Already resolved before the upload starts
    let app = Application::with_provider(test_config(), mock.clone());
    let err = app
        .run_until(&path, &mut Vec::new(), std::future::ready(()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Interrupted), "{err:?}");
    assert_eq!(mock.upload_count(), 1);
    assert!(mock.generate_requests().is_empty());
    assert_eq!(mock.deleted_files().len(), 1);
}
