use super::{cleanup_failed, wait_for_job, wait_until_gone};
use crate::cloud::{CosImageImport, ImageCreate, ImageReference, IMAGE_STATE_ACTIVE};
use crate::config::{CosSource, SourceSettings, StockImageSource};
use crate::error::{ApiResultExt, BuildError};
use crate::pipeline::poll::{poll_until, PollPolicy};
use crate::pipeline::state::BuildState;
use crate::pipeline::step::{ResourceState, Step, StepAction};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

pub const IMPORT_JOB_POLL: PollPolicy = PollPolicy::new(
    "image import job",
    Duration::from_secs(2 * 60),
    Duration::from_secs(30 * 60),
);

pub const STOCK_IMAGE_POLL: PollPolicy = PollPolicy::new(
    "stock image copy",
    Duration::from_secs(2 * 60),
    Duration::from_secs(30 * 60),
);

const BUCKET_ACCESS_PUBLIC: &str = "public";
const STORAGE_TYPE_TIER1: &str = "tier1";
const STOCK_IMAGE_SOURCE: &str = "root-project";
const IMAGE_STATE_FAILED: &str = "failed";

/// Name used for a COS import when none is configured: `<bucket>-image-<0..99>`
pub fn generated_image_name<R: Rng + ?Sized>(bucket: &str, rng: &mut R) -> String {
    format!("{}-image-{}", bucket, rng.gen_range(0..100))
}

/// Makes the base image available in the workspace
///
/// Imports it from a COS bucket, copies it from the stock catalog, or reuses
/// an image that already exists, then resolves it by exact name.
pub struct ImageImportStep {
    source: SourceSettings,
    image: ResourceState,
}

impl ImageImportStep {
    pub fn new(source: SourceSettings) -> Self {
        Self {
            source,
            image: ResourceState::NotStarted,
        }
    }

    pub fn resource(&self) -> &ResourceState {
        &self.image
    }

    async fn import_from_cos(
        &mut self,
        state: &BuildState,
        cos: &CosSource,
        name: &str,
    ) -> Result<(), BuildError> {
        state.ui.message(&format!(
            "Importing {} from the COS bucket {} ({})",
            cos.object, cos.bucket, cos.region
        ));
        match resolve_by_name(state, name).await {
            Ok(existing) => {
                debug!("Image {} already exists as {}", name, existing.image_id);
                return Err(BuildError::ImageNameTaken(name.to_string()));
            }
            Err(BuildError::ImageNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let body = CosImageImport {
            image_name: name.to_string(),
            bucket_name: cos.bucket.clone(),
            bucket_access: BUCKET_ACCESS_PUBLIC.to_string(),
            region: cos.region.clone(),
            image_filename: cos.object.clone(),
            storage_type: STORAGE_TYPE_TIER1.to_string(),
        };
        let job = state
            .clients
            .image
            .import_cos_image(&body)
            .await
            .during("submit image import")?;
        self.image = ResourceState::Submitted {
            name: name.to_string(),
        };
        debug!("Image import job {} submitted for {}", job.id, name);

        wait_for_job(state, &job.id, &IMPORT_JOB_POLL).await
    }

    /// Copies a catalog image into the workspace and returns the copy's name
    async fn import_stock(
        &mut self,
        state: &BuildState,
        stock: &StockImageSource,
    ) -> Result<String, BuildError> {
        let images = &*state.clients.image;
        let ui = &*state.ui;

        ui.message(&format!("Looking up stock image {}", stock.name));
        let catalog = images
            .list_stock_images()
            .await
            .during("list stock images")?;
        let stock_ref = catalog
            .into_iter()
            .find(|image| image.name == stock.name)
            .ok_or_else(|| BuildError::StockImageNotFound(stock.name.clone()))?;

        let created = images
            .create_image(&ImageCreate {
                image_id: stock_ref.image_id,
                source: STOCK_IMAGE_SOURCE.to_string(),
            })
            .await
            .during("copy stock image")?;
        self.image = ResourceState::Created {
            id: created.image_id.clone(),
        };
        ui.message(&format!(
            "Image {} created from the stock catalog, ID: {}",
            created.name, created.image_id
        ));

        let id = created.image_id.as_str();
        poll_until(&STOCK_IMAGE_POLL, &state.cancel, move || async move {
            let image = images.get_image(id).await.during("fetch image")?;
            ui.message(&format!("Image state: {}", image.state));
            match image.state.as_str() {
                IMAGE_STATE_ACTIVE => Ok(true),
                IMAGE_STATE_FAILED => Err(BuildError::RemoteFailed {
                    resource: "image",
                    id: id.to_string(),
                    message: format!("image {} entered the failed state", image.name),
                }),
                _ => Ok(false),
            }
        })
        .await?;

        Ok(created.name)
    }

    async fn execute(&mut self, state: &mut BuildState) -> Result<(), BuildError> {
        state.ui.say("Importing the base image");

        let mut name = self.source.name.clone().unwrap_or_default();
        if let Some(cos) = self.source.cos.clone() {
            if name.is_empty() {
                name = generated_image_name(&cos.bucket, &mut rand::thread_rng());
                state
                    .ui
                    .message(&format!("No image name given, using {}", name));
            }
            self.import_from_cos(state, &cos, &name).await?;
        } else if let Some(stock) = self.source.stock_image.clone() {
            name = self.import_stock(state, &stock).await?;
        }

        let image = resolve_by_name(state, &name).await?;
        state
            .ui
            .message(&format!("Image found with ID: {}", image.image_id));

        self.image = match &self.image {
            ResourceState::NotStarted => ResourceState::Reused {
                id: image.image_id.clone(),
            },
            ResourceState::Submitted { .. } => ResourceState::Created {
                id: image.image_id.clone(),
            },
            other => other.clone(),
        };

        state.record("SourceImageName", image.name.clone());
        state.record("SourceImageID", image.image_id.clone());
        state.source_image = Some(image);
        Ok(())
    }
}

async fn resolve_by_name(state: &BuildState, name: &str) -> Result<ImageReference, BuildError> {
    let images = state
        .clients
        .image
        .list_images()
        .await
        .during("list images")?;
    images
        .into_iter()
        .find(|image| image.name == name)
        .ok_or_else(|| BuildError::ImageNotFound(name.to_string()))
}

#[async_trait]
impl Step for ImageImportStep {
    fn name(&self) -> &'static str {
        "image-import"
    }

    async fn run(&mut self, state: &mut BuildState) -> StepAction {
        let result = self.execute(state).await;
        if result.is_err() {
            self.image.mark_failed();
        }
        state.finish(result)
    }

    async fn cleanup(&mut self, state: &BuildState) -> Result<(), BuildError> {
        let ui = &*state.ui;
        let id = match &self.image {
            ResourceState::Created { id } => id.clone(),
            ResourceState::Submitted { name } => match resolve_by_name(state, name).await {
                Ok(image) => image.image_id,
                Err(BuildError::ImageNotFound(_)) => {
                    ui.message(&format!("Image {} was never created, nothing to delete", name));
                    return Ok(());
                }
                Err(err) => return Err(cleanup_failed(ui, "image", name, err)),
            },
            _ => return Ok(()),
        };

        ui.say("Deleting the imported image");
        let images = &*state.clients.image;
        match images.delete_image(&id).await {
            Err(err) if err.is_not_found() => return Ok(()),
            Err(source) => {
                let err = BuildError::Api {
                    operation: "delete image",
                    source,
                };
                return Err(cleanup_failed(ui, "image", &id, err));
            }
            Ok(()) => {}
        }

        let target = id.as_str();
        wait_until_gone(ui, "image deletion", "image", state.cleanup_timeout, move || async move {
            images.get_image(target).await.map(|image| image.state)
        })
        .await
        .map_err(|err| cleanup_failed(ui, "image", &id, err))?;

        ui.message(&format!("Image {} deleted", id));
        Ok(())
    }
}
