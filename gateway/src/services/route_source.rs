//! Routes file written by the orchestrator

use std::path::PathBuf;

use shared::RouteTable;

use crate::error::GatewayResult;
use crate::traits::RouteSource;

pub struct FileRouteSource {
    path: PathBuf,
}

impl FileRouteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait::async_trait]
impl RouteSource for FileRouteSource {
    /// A missing file is an empty table
    async fn load(&self) -> GatewayResult<RouteTable> {
        Ok(RouteTable::load(&self.path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use shared::WorkerId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_written_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway_routes.json");
        RouteTable::from_ports([(WorkerId(1), 8082), (WorkerId(7), 8088)])
            .save_atomic(&path)
            .await
            .unwrap();

        let table = FileRouteSource::new(&path).load().await.unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(WorkerId(7)).unwrap().upstream, "http://127.0.0.1:8088");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let table = FileRouteSource::new(dir.path().join("absent.json")).load().await.unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gateway_routes.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let result = FileRouteSource::new(&path).load().await;
        assert!(matches!(result, Err(GatewayError::Shared(_))));
    }
}
