//! `HttpExpansionFetcher` against a mock terminology server.

use std::time::Duration;

use octofhir_sdc::{
    CachingExpansionFetcher, ExpansionFetcher, ExpansionRequestConfig, HttpExpansionFetcher,
    TerminologyConfig, TerminologyError,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENDER_VS: &str = "http://hl7.org/fhir/ValueSet/administrative-gender";

fn gender_expansion() -> serde_json::Value {
    json!({
        "resourceType": "ValueSet",
        "url": GENDER_VS,
        "expansion": {
            "total": 2,
            "contains": [
                {"system": "http://hl7.org/fhir/administrative-gender", "code": "male", "display": "Male"},
                {"system": "http://hl7.org/fhir/administrative-gender", "code": "female", "display": "Female"}
            ]
        }
    })
}

#[tokio::test]
async fn test_expand_parses_contains() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ValueSet/$expand"))
        .and(query_param("url", GENDER_VS))
        .respond_with(ResponseTemplate::new(200).set_body_json(gender_expansion()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = HttpExpansionFetcher::new(&format!("{}/", mock_server.uri())).unwrap();
    let concepts = fetcher
        .fetch_expansion(GENDER_VS, &ExpansionRequestConfig::default())
        .await
        .unwrap();

    assert_eq!(concepts.len(), 2);
    assert_eq!(concepts[1].code, "female");
    assert_eq!(concepts[1].display.as_deref(), Some("Female"));
}

#[tokio::test]
async fn test_not_found_and_server_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ValueSet/$expand"))
        .and(query_param("url", "http://example.org/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/ValueSet/$expand"))
        .and(query_param("url", "http://example.org/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let fetcher = HttpExpansionFetcher::new(&mock_server.uri()).unwrap();
    let config = ExpansionRequestConfig::default();

    assert!(matches!(
        fetcher.fetch_expansion("http://example.org/missing", &config).await,
        Err(TerminologyError::ValueSetNotFound(_))
    ));
    assert!(matches!(
        fetcher.fetch_expansion("http://example.org/broken", &config).await,
        Err(TerminologyError::RemoteError(_))
    ));
}

#[tokio::test]
async fn test_request_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ValueSet/$expand"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(gender_expansion())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let fetcher = HttpExpansionFetcher::new(&mock_server.uri()).unwrap();
    let config = ExpansionRequestConfig {
        timeout: Duration::from_millis(50),
    };

    assert!(matches!(
        fetcher.fetch_expansion(GENDER_VS, &config).await,
        Err(TerminologyError::RemoteError(_))
    ));
}

#[tokio::test]
async fn test_cached_fetcher_hits_server_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ValueSet/$expand"))
        .respond_with(ResponseTemplate::new(200).set_body_json(gender_expansion()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let fetcher = CachingExpansionFetcher::new(
        HttpExpansionFetcher::new(&mock_server.uri()).unwrap(),
        Duration::from_secs(60),
    );
    let config = ExpansionRequestConfig::default();

    for _ in 0..3 {
        let concepts = fetcher.fetch_expansion(GENDER_VS, &config).await.unwrap();
        assert_eq!(concepts.len(), 2);
    }
}

#[test]
fn test_from_config_respects_enabled_flag() {
    let config = TerminologyConfig {
        enabled: false,
        ..Default::default()
    };
    assert!(matches!(
        HttpExpansionFetcher::from_config(&config),
        Err(TerminologyError::Disabled)
    ));

    let config = TerminologyConfig {
        server_url: "http://tx.example.org/r4/".into(),
        ..Default::default()
    };
    let fetcher = HttpExpansionFetcher::from_config(&config).unwrap();
    assert_eq!(fetcher.base_url(), "http://tx.example.org/r4");
}
