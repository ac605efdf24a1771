use obs_client::MonitorClient;
use obs_common::ObservatoryConfig;
use obs_server::ObservatoryServer;

async fn spawn_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let log_dir = tempfile::tempdir().unwrap();
    let mut config = ObservatoryConfig::default();
    config.log_dir = log_dir.path().to_path_buf();
    std::mem::forget(log_dir); // keep the directory alive for the server's lifetime

    let server = ObservatoryServer::new(config);
    let app = server
        .router()
        .into_make_service_with_connect_info::<std::net::SocketAddr>();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), handle)
}

#[tokio::test]
async fn health_check_reports_ok() {
    let (base_url, handle) = spawn_test_server().await;
    let client = MonitorClient::new(base_url);

    assert!(client.health().await.unwrap());

    handle.abort();
}

#[tokio::test]
async fn log_list_reflects_files_on_disk() {
    let (base_url, handle) = spawn_test_server().await;
    let client = MonitorClient::new(base_url);

    let names = client.log_list().await.unwrap();
    assert!(names.is_empty());

    handle.abort();
}
