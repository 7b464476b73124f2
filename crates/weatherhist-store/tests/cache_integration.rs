//! End-to-end tests for the cache coordinator against a mocked archive.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use weatherhist_store::{CacheCoordinator, CacheError, StoreError, StoreHandle, StoreLocation};
use weatherhist_weather::{
    ArchiveClient, ClientState, ConfiguredPosition, DataPoint, FetchError, Location,
    LocationTracker, Measurement,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOME: Location = Location {
    latitude: 59.57,
    longitude: 30.19,
};

fn archive_body(days: &[(&str, f64, f64)]) -> serde_json::Value {
    let time: Vec<&str> = days.iter().map(|d| d.0).collect();
    let temps: Vec<f64> = days.iter().map(|d| d.1).collect();
    let precs: Vec<f64> = days.iter().map(|d| d.2).collect();
    serde_json::json!({
        "daily": {
            "time": time,
            "temperature_2m_max": temps,
            "precipitation_sum": precs,
        }
    })
}

async fn coordinator(server: &MockServer) -> CacheCoordinator {
    let store = StoreHandle::in_memory();
    store.open().await.unwrap();
    let archive = Arc::new(ArchiveClient::new(&server.uri()).unwrap());
    CacheCoordinator::new(store, archive)
}

fn dates(points: &[DataPoint]) -> Vec<&str> {
    points.iter().map(|p| p.date.as_str()).collect()
}

#[tokio::test]
async fn empty_store_fetches_whole_range_and_persists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .and(query_param("latitude", "59.57"))
        .and(query_param("longitude", "30.19"))
        .and(query_param("start_date", "2020-01-01"))
        .and(query_param("end_date", "2021-12-31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(&[
            ("2020-01-01", -3.0, 0.4),
            ("2020-07-01", 21.5, 0.0),
            ("2021-01-01", -5.0, 1.2),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = coordinator(&server).await;
    let points = coordinator
        .get_data(Measurement::Temperature, 2020, 2021, HOME)
        .await
        .unwrap();

    assert_eq!(dates(&points), ["2020-01-01", "2020-07-01", "2021-01-01"]);
    assert!(points.iter().all(|p| p.year.is_some()));

    let stored = coordinator
        .store()
        .query_range(Measurement::Temperature, 2020, 2021)
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(
        coordinator.store().count(Measurement::Precipitation).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn partially_cached_range_stores_only_missing_years() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .and(query_param("start_date", "2020-01-01"))
        .and(query_param("end_date", "2021-12-31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(&[
            ("2020-01-01", 100.0, 0.0),
            ("2020-01-02", 100.0, 0.0),
            ("2021-01-01", 7.0, 0.0),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = coordinator(&server).await;
    coordinator
        .store()
        .insert(
            Measurement::Temperature,
            vec![DataPoint::new("2020-01-01", 1.0)],
        )
        .await
        .unwrap();

    let points = coordinator
        .get_data(Measurement::Temperature, 2020, 2021, HOME)
        .await
        .unwrap();

    // 2020 comes from the cache only; the fetched 2020 points are discarded.
    assert_eq!(dates(&points), ["2020-01-01", "2021-01-01"]);
    assert_eq!(points[0].value, 1.0);
    assert_eq!(points[1].value, 7.0);
    assert_eq!(
        coordinator.store().count(Measurement::Temperature).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn fully_cached_range_does_not_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(&[])))
        .expect(0)
        .mount(&server)
        .await;

    let coordinator = coordinator(&server).await;
    coordinator
        .store()
        .insert(
            Measurement::Precipitation,
            vec![
                DataPoint::new("2019-03-02", 0.3),
                DataPoint::new("2018-11-30", 4.0),
            ],
        )
        .await
        .unwrap();

    let points = coordinator
        .get_data(Measurement::Precipitation, 2018, 2019, HOME)
        .await
        .unwrap();

    assert_eq!(dates(&points), ["2018-11-30", "2019-03-02"]);
}

#[tokio::test]
async fn second_request_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(&[
            ("2022-02-01", 1.0, 2.0),
            ("2022-01-01", 0.0, 3.0),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = coordinator(&server).await;
    let first = coordinator
        .get_data(Measurement::Precipitation, 2022, 2022, HOME)
        .await
        .unwrap();
    let second = coordinator
        .get_data(Measurement::Precipitation, 2022, 2022, HOME)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(dates(&second), ["2022-01-01", "2022-02-01"]);
    assert_eq!(second[0].value, 3.0);
}

#[tokio::test]
async fn merged_result_is_sorted_without_duplicates() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(&[
            ("2001-06-01", 5.0, 0.0),
            ("2000-01-01", 9.0, 0.0),
            ("2003-01-01", 6.0, 0.0),
            ("2002-06-01", 9.0, 0.0),
            ("2004-01-01", 9.0, 0.0),
        ])))
        .mount(&server)
        .await;

    let coordinator = coordinator(&server).await;
    coordinator
        .store()
        .insert(
            Measurement::Temperature,
            vec![
                DataPoint::new("2002-06-01", 2.0),
                DataPoint::new("2000-01-01", 1.0),
            ],
        )
        .await
        .unwrap();

    let points = coordinator
        .get_data(Measurement::Temperature, 2000, 2003, HOME)
        .await
        .unwrap();

    assert_eq!(
        dates(&points),
        ["2000-01-01", "2001-06-01", "2002-06-01", "2003-01-01"]
    );
    assert!(points.windows(2).all(|w| w[0].date < w[1].date));
}

#[tokio::test]
async fn fetch_failure_leaves_store_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let coordinator = coordinator(&server).await;
    coordinator
        .store()
        .insert(
            Measurement::Temperature,
            vec![DataPoint::new("2020-01-01", 1.0)],
        )
        .await
        .unwrap();

    let result = coordinator
        .get_data(Measurement::Temperature, 2020, 2021, HOME)
        .await;

    match result {
        Err(CacheError::FetchFailed(FetchError::Network(_))) => {}
        other => panic!("expected fetch failure, got {:?}", other),
    }
    assert_eq!(
        coordinator.store().count(Measurement::Temperature).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn write_failure_after_read_is_persist_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(&[
            ("2020-01-01", 9.0, 0.0),
            ("2021-01-01", 7.0, 0.0),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("weather.db");
    let store = StoreHandle::new(StoreLocation::File(db_path.clone()));
    store.open().await.unwrap();
    store
        .insert(
            Measurement::Temperature,
            vec![DataPoint::new("2020-01-01", 1.0)],
        )
        .await
        .unwrap();

    // Reads keep working; every insert into the table aborts.
    let other = rusqlite::Connection::open(&db_path).unwrap();
    other
        .execute_batch(
            "CREATE TRIGGER reject_temperature BEFORE INSERT ON temperature
             BEGIN SELECT RAISE(ABORT, 'writes disabled'); END;",
        )
        .unwrap();
    drop(other);

    let archive = Arc::new(ArchiveClient::new(&server.uri()).unwrap());
    let coordinator = CacheCoordinator::new(store.clone(), archive);
    let result = coordinator
        .get_data(Measurement::Temperature, 2020, 2021, HOME)
        .await;

    match result {
        Err(CacheError::PersistFailed(StoreError::WriteFailed(_))) => {}
        other => panic!("expected persist failure, got {:?}", other),
    }
    let stored = store
        .query_range(Measurement::Temperature, 2020, 2021)
        .await
        .unwrap();
    assert_eq!(dates(&stored), ["2020-01-01"]);
}

#[tokio::test]
async fn duplicate_archive_dates_are_returned_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(&[
            ("2021-03-01", 4.0, 0.0),
            ("2021-03-01", 8.0, 0.0),
            ("2021-03-02", 5.0, 0.0),
        ])))
        .mount(&server)
        .await;

    let coordinator = coordinator(&server).await;
    let points = coordinator
        .get_data(Measurement::Temperature, 2021, 2021, HOME)
        .await
        .unwrap();

    assert_eq!(dates(&points), ["2021-03-01", "2021-03-02"]);
    assert_eq!(points[0].value, 4.0);

    let stored = coordinator
        .store()
        .query_range(Measurement::Temperature, 2021, 2021)
        .await
        .unwrap();
    assert_eq!(stored.len(), points.len());
}

#[tokio::test]
async fn unavailable_store_is_reported_without_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(&[])))
        .expect(0)
        .mount(&server)
        .await;

    let archive = Arc::new(ArchiveClient::new(&server.uri()).unwrap());
    let coordinator =
        CacheCoordinator::new(StoreHandle::new(StoreLocation::Unavailable), archive);

    let result = coordinator
        .get_data(Measurement::Temperature, 2020, 2020, HOME)
        .await;
    assert!(matches!(
        result,
        Err(CacheError::StoreUnavailable(StoreError::Unsupported))
    ));
}

#[tokio::test]
async fn newer_request_supersedes_older() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .and(query_param("start_date", "1990-01-01"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(archive_body(&[("1990-01-01", 1.0, 1.0)]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .and(query_param("start_date", "2010-01-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(&[(
            "2010-01-01",
            2.0,
            2.0,
        )])))
        .mount(&server)
        .await;

    let coordinator = coordinator(&server).await;

    let older = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .get_data(Measurement::Temperature, 1990, 1990, HOME)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let newer = coordinator
        .get_data(Measurement::Temperature, 2010, 2010, HOME)
        .await
        .unwrap();
    let older = older.await.unwrap();

    assert!(older.as_ref().is_err_and(CacheError::is_superseded));
    assert_eq!(dates(&newer), ["2010-01-01"]);

    let stored = coordinator
        .store()
        .query_range(Measurement::Temperature, 1900, 2100)
        .await
        .unwrap();
    assert_eq!(dates(&stored), ["2010-01-01"]);
}

#[tokio::test]
async fn location_change_clears_cached_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .respond_with(ResponseTemplate::new(200).set_body_json(archive_body(&[(
            "2020-01-01",
            1.0,
            0.0,
        )])))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = StoreHandle::new(StoreLocation::File(dir.path().join("weather.db")));
    let archive = Arc::new(ArchiveClient::new(&server.uri()).unwrap());
    let coordinator = CacheCoordinator::new(store.clone(), archive);
    let tracker = LocationTracker::new(ClientState::new(dir.path().join("state.json")), HOME);

    let here = tracker
        .resolve(&ConfiguredPosition::new(Some(HOME)), &store)
        .await
        .unwrap();
    coordinator
        .get_data(Measurement::Temperature, 2020, 2020, here)
        .await
        .unwrap();
    assert_eq!(store.count(Measurement::Temperature).await.unwrap(), 1);

    // Same location again keeps the cache.
    tracker
        .resolve(&ConfiguredPosition::new(Some(HOME)), &store)
        .await
        .unwrap();
    assert_eq!(store.count(Measurement::Temperature).await.unwrap(), 1);

    let elsewhere = Location::new(55.75, 37.62);
    let resolved = tracker
        .resolve(&ConfiguredPosition::new(Some(elsewhere)), &store)
        .await
        .unwrap();

    assert_eq!(resolved, elsewhere);
    assert_eq!(tracker.last_known(), Some(elsewhere));
    assert_eq!(store.count(Measurement::Temperature).await.unwrap(), 0);
    assert_eq!(store.count(Measurement::Precipitation).await.unwrap(), 0);
}
