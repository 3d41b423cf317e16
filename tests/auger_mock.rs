//! Auger adapter against a mocked hub.

use a2ml::config::{ConfigSection, GENERAL_SECTION};
use a2ml::local::{ContainerRunner, DockerRunner, WorkerInvocation};
use a2ml::providers::auger::{AugerProvider, HubApi};
use a2ml::{A2ml, Error, Outcome, PredictRequest, Provider, ProviderKind, ProviderSettings};
use async_trait::async_trait;
use mockito::{Matcher, Server};
use serde_json::json;
use std::io::Write;
use tempfile::TempDir;
use zip::write::FileOptions;

/// Worker that exits with `exit_code` without writing predictions.
#[derive(Debug)]
struct ExitingRunner {
    exit_code: i32,
}

#[async_trait]
impl ContainerRunner for ExitingRunner {
    async fn run(&self, _invocation: &WorkerInvocation) -> a2ml::Result<i32> {
        Ok(self.exit_code)
    }
}

struct Project {
    dir: TempDir,
    settings: ProviderSettings,
}

impl Project {
    fn new(general: &str, auger: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let auger_path = dir.path().join("auger.yaml");
        std::fs::write(&auger_path, auger).unwrap();

        let mut settings = ProviderSettings::in_memory(ProviderKind::Auger);
        settings.root = Some(dir.path().to_path_buf());
        settings.general = ConfigSection::from_yaml_str(GENERAL_SECTION, general).unwrap();
        settings.own = ConfigSection::load("auger", &auger_path).unwrap();
        Self { dir, settings }
    }

    fn persisted(&self) -> ConfigSection {
        ConfigSection::load("auger", self.dir.path().join("auger.yaml")).unwrap()
    }

    fn provider(&self, server: &Server, token: Option<&str>) -> AugerProvider {
        let hub = HubApi::new(&server.url(), token.map(str::to_string)).unwrap();
        AugerProvider::with_parts(self.settings.clone(), hub, DockerRunner::new()).unwrap()
    }
}

#[tokio::test]
async fn test_import_remote_source_creates_project_and_dataset() {
    let mut server = Server::new_async().await;
    let find = server
        .mock("GET", "/api/v1/projects")
        .match_query(Matcher::UrlEncoded("name".into(), "demo".into()))
        .match_header("authorization", "Bearer tok")
        .with_body(json!({"data": []}).to_string())
        .create_async()
        .await;
    let create = server
        .mock("POST", "/api/v1/projects")
        .match_body(Matcher::PartialJson(json!({"name": "demo"})))
        .with_body(json!({"data": {"id": 11}}).to_string())
        .create_async()
        .await;
    let file = server
        .mock("POST", "/api/v1/project_files")
        .match_body(Matcher::PartialJson(json!({
            "project_id": "11",
            "name": "iris.csv",
            "url": "https://data.example.com/iris.csv",
        })))
        .with_body(json!({"data": {"id": 5}}).to_string())
        .create_async()
        .await;

    let project = Project::new(
        "name: demo\nsource: https://data.example.com/iris.csv\n",
        "",
    );
    let mut auger = project.provider(&server, Some("tok"));
    let outcome = auger.import_data().await.unwrap();

    assert_eq!(outcome, Outcome::Completed(Some("5".to_string())));
    find.assert_async().await;
    create.assert_async().await;
    file.assert_async().await;

    let persisted = project.persisted();
    assert_eq!(persisted.get_str("project/id").as_deref(), Some("11"));
    assert_eq!(persisted.get_str("dataset/id").as_deref(), Some("5"));
}

#[tokio::test]
async fn test_train_starts_session_with_model_settings() {
    let mut server = Server::new_async().await;
    let experiment = server
        .mock("POST", "/api/v1/experiments")
        .match_body(Matcher::PartialJson(json!({"project_id": "11", "project_file_id": "5"})))
        .with_body(json!({"data": {"id": 21}}).to_string())
        .create_async()
        .await;
    let session = server
        .mock("POST", "/api/v1/experiment_sessions")
        .match_body(Matcher::PartialJson(json!({
            "experiment_id": "21",
            "model_settings": {
                "target": "species",
                "model_type": "classification",
                "exclude": ["id"],
                "max_total_time_mins": 30,
            },
        })))
        .with_body(json!({"data": {"id": "s-1"}}).to_string())
        .create_async()
        .await;

    let project = Project::new(
        "name: demo\ntarget: species\nexclude: id\nbudget: 30\n",
        "project:\n  id: 11\ndataset:\n  id: 5\n",
    );
    let mut auger = project.provider(&server, Some("tok"));
    let outcome = auger.train().await.unwrap();

    assert!(matches!(outcome, Outcome::InProgress(_)));
    experiment.assert_async().await;
    session.assert_async().await;
    let persisted = project.persisted();
    assert_eq!(persisted.get_str("experiment/id").as_deref(), Some("21"));
    assert_eq!(persisted.get_str("experiment/session_id").as_deref(), Some("s-1"));
}

#[tokio::test]
async fn test_evaluate_reports_best_trial() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/v1/experiment_sessions/s-1")
        .with_body(json!({"data": {"id": "s-1", "status": "completed"}}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/api/v1/trials")
        .match_query(Matcher::UrlEncoded("experiment_session_id".into(), "s-1".into()))
        .with_body(
            json!({"data": [
                {"id": "t1", "algorithm_name": "SVC", "score": 0.81},
                {"id": "t2", "algorithm_name": "XGBClassifier", "score": 0.93},
            ]})
            .to_string(),
        )
        .create_async()
        .await;

    let project = Project::new("name: demo\n", "experiment:\n  session_id: s-1\n");
    let mut auger = project.provider(&server, Some("tok"));
    let outcome = auger.evaluate().await.unwrap();

    assert_eq!(outcome, Outcome::Completed(Some("t2".to_string())));
    assert_eq!(project.persisted().get_str("experiment/best_trial").as_deref(), Some("t2"));
}

#[tokio::test]
async fn test_evaluate_running_session_is_in_progress() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/v1/experiment_sessions/s-1")
        .with_body(json!({"data": {"status": "started"}}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/api/v1/trials")
        .match_query(Matcher::Any)
        .with_body(json!({"data": []}).to_string())
        .create_async()
        .await;

    let project = Project::new("name: demo\n", "experiment:\n  session_id: s-1\n");
    let mut auger = project.provider(&server, Some("tok"));
    assert_eq!(
        auger.evaluate().await.unwrap(),
        Outcome::InProgress("started".to_string())
    );
}

#[tokio::test]
async fn test_deploy_conflict_is_already_satisfied() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/v1/pipelines")
        .with_status(409)
        .with_body(json!({"error": "pipeline already exists"}).to_string())
        .create_async()
        .await;

    let project = Project::new("name: demo\n", "");
    let auger = project.provider(&server, Some("tok"));
    let mut a2ml = A2ml::from_providers(vec![Box::new(auger)]);

    let report = a2ml.deploy(Some("t2"), false).await;
    assert!(matches!(
        report.get(ProviderKind::Auger),
        Some(Ok(Outcome::AlreadySatisfied(_)))
    ));
    assert!(!report.is_fatal());
}

#[tokio::test]
async fn test_deploy_locally_downloads_model_archive() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/v1/trials/t2/export")
        .with_header("content-type", "application/zip")
        .with_body(b"PK\x05\x06fake".as_slice())
        .create_async()
        .await;

    let project = Project::new("name: demo\n", "");
    let mut auger = project.provider(&server, Some("tok"));
    let outcome = auger.deploy(Some("t2"), true).await.unwrap();

    let archive = project.dir.path().join("models").join("export_t2.zip");
    assert_eq!(outcome, Outcome::Written(archive.clone()));
    assert!(archive.is_file());
}

#[tokio::test]
async fn test_cloud_predict_writes_predicted_file() {
    let mut server = Server::new_async().await;
    let predict = server
        .mock("POST", "/api/v1/pipelines/p-9/predict")
        .match_body(Matcher::PartialJson(json!({
            "columns": ["sepal", "petal"],
            "data": [["5.1", "1.4"], ["6.2", "4.5"]],
            "threshold": 0.5,
        })))
        .with_body(json!({"data": {"predictions": ["setosa", "versicolor"]}}).to_string())
        .create_async()
        .await;

    let project = Project::new("name: demo\ntarget: species\n", "pipeline:\n  id: p-9\n");
    let input = project.dir.path().join("iris.csv");
    std::fs::write(&input, "sepal,petal,species\n5.1,1.4,\n6.2,4.5,\n").unwrap();

    let mut auger = project.provider(&server, Some("tok"));
    let outcome = auger
        .predict(&PredictRequest::new(&input).threshold(0.5))
        .await
        .unwrap();

    let output = project.dir.path().join("iris_predicted.csv");
    assert_eq!(outcome, Outcome::Written(output.clone()));
    predict.assert_async().await;
    assert_eq!(
        std::fs::read_to_string(output).unwrap(),
        "sepal,petal,species\n5.1,1.4,setosa\n6.2,4.5,versicolor\n"
    );
}

#[tokio::test]
async fn test_cloud_operations_require_login() {
    let server = Server::new_async().await;
    let project = Project::new("name: demo\nsource: https://x/iris.csv\n", "");
    let mut auger = project.provider(&server, None);
    assert!(matches!(
        auger.import_data().await,
        Err(Error::Authentication { .. })
    ));
}

#[tokio::test]
async fn test_local_predict_without_archive_needs_deploy() {
    let server = Server::new_async().await;
    let project = Project::new("name: demo\n", "");
    let input = project.dir.path().join("iris.csv");
    std::fs::write(&input, "a\n1\n").unwrap();

    let mut auger = project.provider(&server, None);
    let err = auger
        .predict(&PredictRequest::new(&input).model_id("t2").locally(true))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

#[tokio::test]
async fn test_import_file_conflict_is_a_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/v1/project_files")
        .with_status(409)
        .with_body(json!({"error": "file with this name already exists"}).to_string())
        .create_async()
        .await;

    let project = Project::new(
        "name: demo\nsource: https://data.example.com/iris.csv\n",
        "project:\n  id: 11\n",
    );
    let auger = project.provider(&server, Some("tok"));
    let mut a2ml = A2ml::from_providers(vec![Box::new(auger)]);

    let report = a2ml.import_data().await;
    assert!(matches!(
        report.get(ProviderKind::Auger),
        Some(Err(Error::RemoteService { status: Some(409), already_satisfied: false, .. }))
    ));
    assert!(report.is_fatal());
    assert!(project.persisted().get_str("dataset/id").is_none());
}

#[tokio::test]
async fn test_local_predict_container_failure_through_facade() {
    let server = Server::new_async().await;
    let project = Project::new("name: demo\n", "");
    let models = project.dir.path().join("models");
    std::fs::create_dir(&models).unwrap();
    let mut zip = zip::ZipWriter::new(std::fs::File::create(models.join("export_7.zip")).unwrap());
    zip.start_file("client.py", FileOptions::default()).unwrap();
    zip.write_all(b"print('predict')\n").unwrap();
    zip.finish().unwrap();
    let input = project.dir.path().join("iris.csv");
    std::fs::write(&input, "a,b\n1,2\n").unwrap();

    let hub = HubApi::new(&server.url(), None).unwrap();
    let auger = AugerProvider::with_parts(project.settings.clone(), hub, ExitingRunner { exit_code: 3 }).unwrap();
    let mut a2ml = A2ml::from_providers(vec![Box::new(auger)]);

    let report = a2ml.predict(input.clone(), Some("7"), None, true).await;
    assert!(matches!(
        report.get(ProviderKind::Auger),
        Some(Err(Error::LocalExecution { exit_code: Some(3), .. }))
    ));
    assert!(!report.is_success());
    assert!(!project.dir.path().join("iris_predicted.csv").exists());
    assert!(!models.join("export_7").exists());
}

#[tokio::test]
async fn test_repeated_evaluate_reports_the_same_best_trial() {
    let mut server = Server::new_async().await;
    let session = server
        .mock("GET", "/api/v1/experiment_sessions/s-1")
        .with_body(json!({"data": {"id": "s-1", "status": "completed"}}).to_string())
        .expect(2)
        .create_async()
        .await;
    server
        .mock("GET", "/api/v1/trials")
        .match_query(Matcher::Any)
        .with_body(json!({"data": [{"id": "t2", "algorithm_name": "SVC", "score": 0.9}]}).to_string())
        .create_async()
        .await;

    let project = Project::new("name: demo\n", "experiment:\n  session_id: s-1\n");
    let mut auger = project.provider(&server, Some("tok"));
    let first = auger.evaluate().await.unwrap();
    let persisted = std::fs::read_to_string(project.dir.path().join("auger.yaml")).unwrap();
    let second = auger.evaluate().await.unwrap();

    session.assert_async().await;
    assert_eq!(first, second);
    assert_eq!(
        std::fs::read_to_string(project.dir.path().join("auger.yaml")).unwrap(),
        persisted
    );
}

#[tokio::test]
async fn test_review_reports_pipeline_without_changes() {
    let mut server = Server::new_async().await;
    let pipeline = server
        .mock("GET", "/api/v1/pipelines/p-9")
        .with_body(json!({"data": {"id": "p-9", "status": "ready", "trial_id": "t2"}}).to_string())
        .expect(2)
        .create_async()
        .await;

    let project = Project::new("name: demo\n", "pipeline:\n  id: p-9\n");
    let before = std::fs::read_to_string(project.dir.path().join("auger.yaml")).unwrap();
    let mut auger = project.provider(&server, Some("tok"));
    for _ in 0..2 {
        assert_eq!(
            auger.review().await.unwrap(),
            Outcome::Completed(Some("p-9".to_string()))
        );
    }

    pipeline.assert_async().await;
    assert_eq!(
        std::fs::read_to_string(project.dir.path().join("auger.yaml")).unwrap(),
        before
    );
}

#[tokio::test]
async fn test_review_without_pipeline_reports_session() {
    let mut server = Server::new_async().await;
    let session = server
        .mock("GET", "/api/v1/experiment_sessions/s-1")
        .with_body(
            json!({"data": {"id": "s-1", "status": "started", "model_settings": {"target": "species"}}})
                .to_string(),
        )
        .create_async()
        .await;

    let project = Project::new("name: demo\n", "experiment:\n  session_id: s-1\n");
    let mut auger = project.provider(&server, Some("tok"));
    assert_eq!(
        auger.review().await.unwrap(),
        Outcome::Completed(Some("s-1".to_string()))
    );
    session.assert_async().await;
}

#[tokio::test]
async fn test_train_without_project_name_creates_no_experiment() {
    let mut server = Server::new_async().await;
    let experiment = server
        .mock("POST", "/api/v1/experiments")
        .expect(0)
        .create_async()
        .await;

    let project = Project::new("target: species\n", "project:\n  id: 11\ndataset:\n  id: 5\n");
    let mut auger = project.provider(&server, Some("tok"));
    assert!(matches!(auger.train().await, Err(Error::Configuration { .. })));
    experiment.assert_async().await;
}
