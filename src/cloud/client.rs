use super::error::ApiError;
use super::types::{
    CosImageImport, DhcpServer, DhcpServerCreate, DhcpServerDetail, Image, ImageCreate,
    ImageReference, InstanceAction, InstanceCapture, InstanceCreate, Job, JobReference, Network,
    NetworkCreate, PvmInstance,
};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait NetworkApi: Send + Sync {
    async fn create_network(&self, body: &NetworkCreate) -> Result<Network, ApiError>;

    async fn get_network(&self, id: &str) -> Result<Network, ApiError>;

    async fn delete_network(&self, id: &str) -> Result<(), ApiError>;
}

#[async_trait]
pub trait InstanceApi: Send + Sync {
    /// Submits an instance creation; the service may answer with several handles
    async fn create_instance(&self, body: &InstanceCreate) -> Result<Vec<PvmInstance>, ApiError>;

    async fn get_instance(&self, id: &str) -> Result<PvmInstance, ApiError>;

    async fn delete_instance(&self, id: &str) -> Result<(), ApiError>;

    async fn instance_action(&self, id: &str, body: &InstanceAction) -> Result<(), ApiError>;

    async fn capture_instance(
        &self,
        id: &str,
        body: &InstanceCapture,
    ) -> Result<JobReference, ApiError>;
}

#[async_trait]
pub trait ImageApi: Send + Sync {
    async fn import_cos_image(&self, body: &CosImageImport) -> Result<JobReference, ApiError>;

    /// Copies a stock catalog image into the workspace
    async fn create_image(&self, body: &ImageCreate) -> Result<Image, ApiError>;

    async fn get_image(&self, id: &str) -> Result<Image, ApiError>;

    async fn list_images(&self) -> Result<Vec<ImageReference>, ApiError>;

    async fn list_stock_images(&self) -> Result<Vec<ImageReference>, ApiError>;

    async fn delete_image(&self, id: &str) -> Result<(), ApiError>;
}

#[async_trait]
pub trait JobApi: Send + Sync {
    async fn get_job(&self, id: &str) -> Result<Job, ApiError>;
}

#[async_trait]
pub trait DhcpApi: Send + Sync {
    async fn create_dhcp_server(&self, body: &DhcpServerCreate) -> Result<DhcpServer, ApiError>;

    async fn get_dhcp_server(&self, id: &str) -> Result<DhcpServerDetail, ApiError>;

    async fn delete_dhcp_server(&self, id: &str) -> Result<(), ApiError>;
}

/// Handles to every remote capability a build needs
#[derive(Clone)]
pub struct CloudClients {
    pub network: Arc<dyn NetworkApi>,
    pub instance: Arc<dyn InstanceApi>,
    pub image: Arc<dyn ImageApi>,
    pub job: Arc<dyn JobApi>,
    pub dhcp: Arc<dyn DhcpApi>,
}

impl CloudClients {
    /// Uses one client value for all capabilities
    pub fn from_shared<C>(client: Arc<C>) -> Self
    where
        C: NetworkApi + InstanceApi + ImageApi + JobApi + DhcpApi + 'static,
    {
        Self {
            network: client.clone(),
            instance: client.clone(),
            image: client.clone(),
            job: client.clone(),
            dhcp: client,
        }
    }
}

impl std::fmt::Debug for CloudClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClients").finish_non_exhaustive()
    }
}
