//! Google adapter against a mocked AutoML endpoint.

use a2ml::config::{ConfigSection, GENERAL_SECTION};
use a2ml::providers::google::GoogleProvider;
use a2ml::transport::RestClient;
use a2ml::{A2ml, Error, Outcome, PredictRequest, Provider, ProviderKind, ProviderSettings};
use mockito::{Matcher, Server};
use serde_json::json;
use tempfile::TempDir;

const LOCATION: &str = "/projects/demo/locations/us-central1";

struct Project {
    dir: TempDir,
    settings: ProviderSettings,
}

impl Project {
    fn new(general: &str, google: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let google_path = dir.path().join("google.yaml");
        std::fs::write(&google_path, format!("project: demo\npoll_interval_secs: 0\n{}", google)).unwrap();

        let mut settings = ProviderSettings::in_memory(ProviderKind::Google);
        settings.root = Some(dir.path().to_path_buf());
        settings.general = ConfigSection::from_yaml_str(GENERAL_SECTION, general).unwrap();
        settings.own = ConfigSection::load("google", &google_path).unwrap();
        Self { dir, settings }
    }

    fn persisted(&self) -> ConfigSection {
        ConfigSection::load("google", self.dir.path().join("google.yaml")).unwrap()
    }

    fn provider(&self, server: &Server) -> GoogleProvider {
        let rest = RestClient::new("google", server.url(), Some("tok".to_string())).unwrap();
        GoogleProvider::with_client(self.settings.clone(), rest).unwrap()
    }
}

#[tokio::test]
async fn test_import_from_gcs_polls_operation() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", format!("{}/datasets", LOCATION).as_str())
        .match_body(Matcher::PartialJson(json!({"displayName": "demo_1"})))
        .with_body(json!({"name": "projects/demo/locations/us-central1/datasets/TBL42"}).to_string())
        .create_async()
        .await;
    let import = server
        .mock("POST", format!("{}/datasets/TBL42:importData", LOCATION).as_str())
        .match_body(Matcher::Json(json!({
            "inputConfig": {"gcsSource": {"inputUris": ["gs://bucket/a.csv", "gs://bucket/b.csv"]}}
        })))
        .with_body(json!({"name": "projects/demo/locations/us-central1/operations/op-1"}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", format!("{}/operations/op-1", LOCATION).as_str())
        .with_body(json!({"name": "op-1", "done": true, "response": {}}).to_string())
        .create_async()
        .await;

    let project = Project::new(
        "name: demo-1\nsource: gs://bucket/a.csv,gs://bucket/b.csv\n",
        "",
    );
    let mut google = project.provider(&server);
    let outcome = google.import_data().await.unwrap();

    assert_eq!(outcome, Outcome::Completed(Some("TBL42".to_string())));
    import.assert_async().await;
    assert_eq!(project.persisted().get_str("dataset_id").as_deref(), Some("TBL42"));
}

#[tokio::test]
async fn test_import_bigquery_source() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", format!("{}/datasets", LOCATION).as_str())
        .with_body(json!({"name": "projects/demo/locations/us-central1/datasets/TBL7"}).to_string())
        .create_async()
        .await;
    let import = server
        .mock("POST", format!("{}/datasets/TBL7:importData", LOCATION).as_str())
        .match_body(Matcher::Json(json!({
            "inputConfig": {"bigquerySource": {"inputUri": "bq://demo.sales.orders"}}
        })))
        .with_body(json!({"name": "projects/demo/locations/us-central1/operations/op-2"}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", format!("{}/operations/op-2", LOCATION).as_str())
        .with_body(
            json!({"done": true, "error": {"code": 3, "message": "bad schema"}}).to_string(),
        )
        .create_async()
        .await;

    let project = Project::new("name: demo\nsource: bq://demo.sales.orders\n", "");
    let mut google = project.provider(&server);
    let err = google.import_data().await.unwrap_err();

    import.assert_async().await;
    assert!(matches!(err, Error::RemoteService { ref message, .. } if message == "bad schema"));
}

#[tokio::test]
async fn test_train_builds_feature_list_and_budget() {
    let mut server = Server::new_async().await;
    let dataset = format!("{}/datasets/TBL42", LOCATION);
    server
        .mock("GET", format!("{}/tableSpecs", dataset).as_str())
        .with_body(json!({"tableSpecs": [{"name": "projects/demo/locations/us-central1/datasets/TBL42/tableSpecs/T1"}]}).to_string())
        .create_async()
        .await;
    let column = |id: &str, name: &str| {
        json!({"name": format!("projects/demo/locations/us-central1/datasets/TBL42/tableSpecs/T1/columnSpecs/{}", id), "displayName": name})
    };
    server
        .mock("GET", format!("{}/tableSpecs/T1/columnSpecs", dataset).as_str())
        .with_body(
            json!({"columnSpecs": [
                column("1", "id"),
                column("2", "rooms"),
                column("3", "area"),
                column("4", "price"),
            ]})
            .to_string(),
        )
        .create_async()
        .await;
    let target = server
        .mock("PATCH", dataset.as_str())
        .match_query(Matcher::UrlEncoded(
            "updateMask".into(),
            "tablesDatasetMetadata.targetColumnSpecId".into(),
        ))
        .match_body(Matcher::Json(json!({"tablesDatasetMetadata": {"targetColumnSpecId": "4"}})))
        .with_body(json!({}).to_string())
        .create_async()
        .await;
    let model = server
        .mock("POST", format!("{}/models", LOCATION).as_str())
        .match_body(Matcher::PartialJson(json!({
            "datasetId": "TBL42",
            "tablesModelMetadata": {
                "targetColumnSpec": column("4", "price"),
                "inputFeatureColumnSpecs": [column("2", "rooms"), column("3", "area")],
                "trainBudgetMilliNodeHours": "1000",
                "optimizationObjective": "MINIMIZE_RMSE",
            },
        })))
        .with_body(json!({"name": "projects/demo/locations/us-central1/operations/train-1"}).to_string())
        .create_async()
        .await;

    let project = Project::new(
        "name: demo\ntarget: price\nexclude: id,zipcode\nbudget: 60\n",
        "dataset_id: TBL42\nexperiment:\n  metric: MINIMIZE_RMSE\n",
    );
    let mut google = project.provider(&server);
    let outcome = google.train().await.unwrap();

    target.assert_async().await;
    model.assert_async().await;
    assert!(matches!(outcome, Outcome::InProgress(_)));
    assert_eq!(
        project.persisted().get_str("operation_name").as_deref(),
        Some("projects/demo/locations/us-central1/operations/train-1")
    );
}

#[tokio::test]
async fn test_evaluate_persists_model_name() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", format!("{}/operations/train-1", LOCATION).as_str())
        .with_body(
            json!({"done": true, "response": {"name": "projects/demo/locations/us-central1/models/TBL9"}})
                .to_string(),
        )
        .create_async()
        .await;
    let evaluations = server
        .mock("GET", format!("{}/models/TBL9/modelEvaluations", LOCATION).as_str())
        .with_body(
            json!({"modelEvaluation": [{
                "name": "projects/demo/locations/us-central1/models/TBL9/modelEvaluations/E1",
                "evaluatedExampleCount": 120,
                "createTime": "2019-05-01T10:00:00Z",
            }]})
            .to_string(),
        )
        .create_async()
        .await;

    let project = Project::new(
        "name: demo\n",
        "operation_name: projects/demo/locations/us-central1/operations/train-1\n",
    );
    let mut google = project.provider(&server);
    let outcome = google.evaluate().await.unwrap();

    evaluations.assert_async().await;
    let model = "projects/demo/locations/us-central1/models/TBL9";
    assert_eq!(outcome, Outcome::Completed(Some(model.to_string())));
    assert_eq!(project.persisted().get_str("model_name").as_deref(), Some(model));
}

#[tokio::test]
async fn test_evaluate_while_training() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", format!("{}/operations/train-1", LOCATION).as_str())
        .with_body(json!({"name": "train-1"}).to_string())
        .create_async()
        .await;

    let project = Project::new(
        "name: demo\n",
        "operation_name: projects/demo/locations/us-central1/operations/train-1\n",
    );
    let mut google = project.provider(&server);
    assert!(matches!(google.evaluate().await.unwrap(), Outcome::InProgress(_)));
    assert!(project.persisted().get_str("model_name").is_none());
}

#[tokio::test]
async fn test_deploy_already_deploying_is_not_fatal() {
    let mut server = Server::new_async().await;
    let deploy = server
        .mock("POST", format!("{}/models/TBL9:deploy", LOCATION).as_str())
        .with_status(400)
        .with_body(
            json!({"error": {"code": 400, "message": "model is being deployed", "status": "FAILED_PRECONDITION"}})
                .to_string(),
        )
        .create_async()
        .await;

    let project = Project::new("name: demo\n", "");
    let google = project.provider(&server);
    let mut a2ml = A2ml::from_providers(vec![Box::new(google)]);

    // A bare model id resolves to the full model path.
    let report = a2ml.deploy(Some("TBL9"), false).await;
    deploy.assert_async().await;
    assert!(matches!(
        report.get(ProviderKind::Google),
        Some(Ok(Outcome::AlreadySatisfied(_)))
    ));
    assert!(!report.is_fatal());
}

#[tokio::test]
async fn test_deploy_other_failure_is_fatal() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", format!("{}/models/TBL9:deploy", LOCATION).as_str())
        .with_status(404)
        .with_body(json!({"error": {"code": 404, "message": "no model", "status": "NOT_FOUND"}}).to_string())
        .create_async()
        .await;

    let project = Project::new(
        "name: demo\n",
        "model_name: projects/demo/locations/us-central1/models/TBL9\n",
    );
    let google = project.provider(&server);
    let mut a2ml = A2ml::from_providers(vec![Box::new(google)]);

    let report = a2ml.deploy(None, false).await;
    assert!(report.is_fatal());
}

#[tokio::test]
async fn test_predict_applies_threshold_and_writes_output() {
    let mut server = Server::new_async().await;
    let model = format!("{}/models/TBL9", LOCATION);
    server
        .mock("POST", format!("{}:predict", model).as_str())
        .match_body(Matcher::PartialJson(json!({"payload": {"row": {"values": [1.0, 2.5]}}})))
        .with_body(
            json!({"payload": [
                {"tables": {"value": "yes", "score": 0.8}},
                {"tables": {"value": "no", "score": 0.2}},
            ]})
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("POST", format!("{}:predict", model).as_str())
        .match_body(Matcher::PartialJson(json!({"payload": {"row": {"values": [3.0, 4.0]}}})))
        .with_body(
            json!({"payload": [
                {"tables": {"value": "yes", "score": 0.4}},
                {"tables": {"value": "no", "score": 0.6}},
            ]})
            .to_string(),
        )
        .create_async()
        .await;

    let project = Project::new(
        "name: demo\ntarget: label\n",
        "model_name: projects/demo/locations/us-central1/models/TBL9\n",
    );
    let input = project.dir.path().join("rows.csv");
    std::fs::write(&input, "x,y\n1,2.5\n3,4\n").unwrap();

    let mut google = project.provider(&server);
    let outcome = google
        .predict(&PredictRequest::new(&input).threshold(0.7))
        .await
        .unwrap();

    let output = project.dir.path().join("rows_predicted.csv");
    assert_eq!(outcome, Outcome::Written(output.clone()));
    assert_eq!(
        std::fs::read_to_string(output).unwrap(),
        "x,y,label\n1,2.5,yes\n3,4,\n"
    );
}

#[tokio::test]
async fn test_predict_rejects_non_numeric_rows() {
    let server = Server::new_async().await;
    let project = Project::new(
        "name: demo\n",
        "model_name: projects/demo/locations/us-central1/models/TBL9\n",
    );
    let input = project.dir.path().join("rows.csv");
    std::fs::write(&input, "x,y\n1,abc\n").unwrap();

    let mut google = project.provider(&server);
    let err = google.predict(&PredictRequest::new(&input)).await.unwrap_err();
    match err {
        Error::DataFormat { context, .. } => {
            assert_eq!(context.field_path.as_deref(), Some("row 1, column y"));
        }
        other => panic!("expected data format error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_repeated_evaluate_is_stable() {
    let mut server = Server::new_async().await;
    let operation = server
        .mock("GET", format!("{}/operations/train-1", LOCATION).as_str())
        .with_body(
            json!({"done": true, "response": {"name": "projects/demo/locations/us-central1/models/TBL9"}})
                .to_string(),
        )
        .expect(2)
        .create_async()
        .await;
    server
        .mock("GET", format!("{}/models/TBL9/modelEvaluations", LOCATION).as_str())
        .with_body(json!({"modelEvaluation": []}).to_string())
        .expect(2)
        .create_async()
        .await;

    let project = Project::new(
        "name: demo\n",
        "operation_name: projects/demo/locations/us-central1/operations/train-1\n",
    );
    let mut google = project.provider(&server);
    let first = google.evaluate().await.unwrap();
    let persisted = std::fs::read_to_string(project.dir.path().join("google.yaml")).unwrap();
    let second = google.evaluate().await.unwrap();

    operation.assert_async().await;
    assert_eq!(first, second);
    assert_eq!(
        std::fs::read_to_string(project.dir.path().join("google.yaml")).unwrap(),
        persisted
    );
}

#[tokio::test]
async fn test_review_reports_model_without_changes() {
    let mut server = Server::new_async().await;
    let model = server
        .mock("GET", format!("{}/models/TBL9", LOCATION).as_str())
        .with_body(
            json!({
                "name": "projects/demo/locations/us-central1/models/TBL9",
                "displayName": "demo_model",
                "createTime": "2019-05-01T10:00:00Z",
                "deploymentState": "DEPLOYED",
                "tablesModelMetadata": {"trainBudgetMilliNodeHours": "1000"},
            })
            .to_string(),
        )
        .expect(2)
        .create_async()
        .await;

    let project = Project::new(
        "name: demo\n",
        "model_name: projects/demo/locations/us-central1/models/TBL9\n",
    );
    let before = std::fs::read_to_string(project.dir.path().join("google.yaml")).unwrap();
    let mut google = project.provider(&server);
    for _ in 0..2 {
        assert_eq!(
            google.review().await.unwrap(),
            Outcome::Completed(Some("projects/demo/locations/us-central1/models/TBL9".to_string()))
        );
    }

    model.assert_async().await;
    assert_eq!(
        std::fs::read_to_string(project.dir.path().join("google.yaml")).unwrap(),
        before
    );
}

#[tokio::test]
async fn test_review_needs_a_trained_model() {
    let server = Server::new_async().await;
    let project = Project::new("name: demo\n", "");
    let mut google = project.provider(&server);
    assert!(matches!(google.review().await, Err(Error::Configuration { .. })));
}
