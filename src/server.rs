use crate::{
    config::{Config, Validatable},
    detection_service::DetectionService,
    labels::ClassLabels,
    model_service::ModelService,
    ort_service::OrtModelService,
    routes::api_routes,
    state::SharedState,
};
use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, signal};

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        detection_service: DetectionService<M>,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let router = api_routes(config.server.max_body_bytes)
            .with_state(SharedState::new(detection_service));

        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        Ok(Self { router, listener })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!("Detection service listening on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async {
                shutdown_signal().await;
                tracing::info!("Shutdown signal received, starting graceful shutdown");
            })
            .await?;

        tracing::info!("Detection service stopped");
        Ok(())
    }
}

pub fn load_labels(config: &Config) -> anyhow::Result<ClassLabels> {
    match &config.labels {
        Some(labels_config) => {
            let path = labels_config.get_path();
            let labels = ClassLabels::from_file(&path)
                .with_context(|| format!("failed to load labels from {:?}", path))?;
            tracing::info!("Loaded {} class labels from {:?}", labels.len(), path);
            Ok(labels)
        }
        None => {
            tracing::info!("Using built-in COCO class labels");
            Ok(ClassLabels::coco())
        }
    }
}

pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let labels = load_labels(&config)?;
    let ort_model_service =
        OrtModelService::new(&config.model).context("failed to instantiate ort model service")?;

    let detection_service = DetectionService::new(ort_model_service, labels);
    let server = HttpServer::new(detection_service, &config).await?;

    server.run().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LabelsConfig, LogLevel, ModelConfig, ServerConfig};
    use crate::detection_service::tests::{png_image, MockModelService};
    use std::path::PathBuf;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config(labels: Option<LabelsConfig>) -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                max_body_bytes: 1024 * 1024,
            },
            log_level: LogLevel::Info,
            model: ModelConfig {
                model_dir: PathBuf::from("models"),
                onnx_file: "yolov8n.onnx".to_string(),
                num_instances: 1,
                input_size: 640,
                min_probability: 0.25,
                iou_threshold: 0.7,
            },
            labels,
        }
    }

    #[test]
    fn test_load_labels_defaults_to_coco() {
        let labels = load_labels(&config(None)).unwrap();
        assert_eq!(labels.len(), 80);
    }

    #[test]
    fn test_load_labels_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("labels.txt"), "cat\nperson\n").unwrap();

        let labels = load_labels(&config(Some(LabelsConfig {
            labels_file: "labels.txt".to_string(),
            labels_dir: dir.path().to_path_buf(),
        })))
        .unwrap();

        assert_eq!(labels.get(1), Some("person"));
    }

    #[tokio::test]
    async fn test_server_answers_over_tcp() {
        let detection_service =
            DetectionService::new(MockModelService { detections: vec![] }, ClassLabels::coco());
        let server = HttpServer::new(detection_service, &config(None)).await.unwrap();
        let addr = server.listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(server.listener, server.router).await
        });

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let body = png_image(8, 8);
        let (mut reader, mut writer) = stream.into_split();
        let head = format!(
            "POST /detectHuman HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            addr,
            body.len()
        );
        writer.write_all(head.as_bytes()).await.unwrap();
        writer.write_all(&body).await.unwrap();

        let mut response = String::new();
        reader.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"personFound\":0"));
        handle.abort();
    }
}
