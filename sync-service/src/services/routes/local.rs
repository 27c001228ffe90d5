use super::{BuiltPackage, DeliveryRoute, RouteError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// Writes built packages under a tenant-scoped directory using a
/// deterministic name derived from the submission id, so redelivery
/// overwrites rather than duplicates.
pub struct LocalRoute {
    base_dir: PathBuf,
}

impl LocalRoute {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl DeliveryRoute for LocalRoute {
    async fn deliver(&self, package: &BuiltPackage) -> Result<String, RouteError> {
        let dir = self.base_dir.join(&package.tenant_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| RouteError::Io(format!("creating {}: {}", dir.display(), e)))?;

        let path = dir.join(&package.file_name);
        fs::write(&path, &package.content)
            .await
            .map_err(|e| RouteError::Io(format!("writing {}: {}", path.display(), e)))?;

        tracing::info!(
            tenant_id = %package.tenant_id,
            submission_id = %package.submission_id,
            path = %path.display(),
            "Package written locally"
        );
        Ok(format!("local:{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_package_under_tenant_directory() {
        let dir = format!("target/test-route-{}", uuid::Uuid::new_v4());
        let route = LocalRoute::new(&dir);
        let package = BuiltPackage {
            tenant_id: "t1".into(),
            submission_id: "m1".into(),
            file_name: "submission_m1.zip".into(),
            content: b"PK".to_vec(),
        };

        let location = route.deliver(&package).await.unwrap();
        assert!(location.starts_with("local:"));

        let written = tokio::fs::read(format!("{}/t1/submission_m1.zip", dir))
            .await
            .unwrap();
        assert_eq!(written, b"PK");

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
