//! Layered image builder.
//!
//! Drives a build from planned layers to a tagged image:
//!
//! 1. Plan layers from the instruction set
//! 2. For each layer, reuse a cached image or run the layer's commands in a
//!    fresh container started from the previous layer's image. A cached
//!    layer still carries its ARG, ENV, WORKDIR and USER effects forward
//! 3. Commit every executed layer; the final commit carries the configured
//!    labels and tags

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_core::config::BuildConfig;
use kiln_core::error::{KilnError, Result};
use kiln_core::event::{BuildEvent, EventEmitter};

use crate::build_context::BuildContext;
use crate::cache::LayerCache;
use crate::client::{Client, ImageTag};
use crate::context::{CommandLog, GlobalContext};
use crate::instruction::InstructionSet;
use crate::layer::ImageLayer;
use crate::planner::plan_layers;

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultImage {
    /// Id of the final image
    pub image_id: String,
    /// Output of every RUN executed during the build, in order
    pub logs: Vec<CommandLog>,
}

/// Callbacks around a build.
#[async_trait]
pub trait BuildHooks: Send + Sync {
    /// Called once the layers are planned, before anything runs.
    async fn before_build(&self, _layers: &[ImageLayer]) -> Result<()> {
        Ok(())
    }

    /// Called with the result of a successful build.
    async fn after_build(&self, _result: &ResultImage) -> Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl BuildHooks for NoopHooks {}

/// Builds images layer by layer through a container runtime.
pub struct Builder {
    client: Arc<dyn Client>,
    cache: Arc<dyn LayerCache>,
    build_context: Arc<dyn BuildContext>,
    config: BuildConfig,
    hooks: Arc<dyn BuildHooks>,
    events: Option<EventEmitter>,
}

impl Builder {
    pub fn new(
        client: Arc<dyn Client>,
        cache: Arc<dyn LayerCache>,
        build_context: Arc<dyn BuildContext>,
        config: BuildConfig,
    ) -> Self {
        Self {
            client,
            cache,
            build_context,
            config,
            hooks: Arc::new(NoopHooks),
            events: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn BuildHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Publish build progress on `events`.
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build the image described by `set`.
    ///
    /// Layers run strictly in order. The first error aborts the build;
    /// layers committed before it stay committed and cached. With
    /// `forcerm`, the container of the failing layer is removed.
    pub async fn build(&self, set: &InstructionSet) -> Result<ResultImage> {
        let build_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(build_id = %build_id, base_image = %set.base_image, "Starting build");
        self.emit(BuildEvent::with_string("build.started", &build_id, &set.base_image));

        match self.run(&build_id, set).await {
            Ok(result) => {
                tracing::info!(build_id = %build_id, image_id = %result.image_id, "Build finished");
                self.emit(BuildEvent::with_string(
                    "build.finished",
                    &build_id,
                    &result.image_id,
                ));
                Ok(result)
            }
            Err(e) => {
                tracing::error!(build_id = %build_id, error = %e, "Build failed");
                self.emit(BuildEvent::with_string("build.failed", &build_id, e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(&self, build_id: &str, set: &InstructionSet) -> Result<ResultImage> {
        set.validate()?;
        let tags = self
            .config
            .tags_and_repos
            .iter()
            .map(|t| ImageTag::parse(t))
            .collect::<Result<Vec<_>>>()?;

        let mut layers = plan_layers(
            &set.instructions,
            &set.contexts,
            self.config.layers.as_deref(),
        )?;
        tracing::info!(layers = layers.len(), "Planned layers");
        self.hooks.before_build(&layers).await?;

        let mut global = GlobalContext::new();
        let mut parent: Option<String> = None;
        let mut logs = Vec::new();

        for layer in layers.iter_mut() {
            let result = self
                .build_layer(build_id, &set.base_image, layer, &mut global, &mut parent, &tags)
                .await;
            if let Err(e) = result {
                self.remove_failed_container(layer).await;
                return Err(e);
            }
            logs.append(&mut layer.context.logs);
        }

        let image_id = parent
            .ok_or_else(|| KilnError::PlanError("Build produced no image".to_string()))?;
        let result = ResultImage { image_id, logs };
        self.hooks.after_build(&result).await?;

        let unused = global.unused_buildargs(&self.config.buildargs);
        if !unused.is_empty() {
            tracing::warn!(
                unused = ?unused,
                "Build arguments were not consumed by any ARG instruction"
            );
        }

        Ok(result)
    }

    async fn build_layer(
        &self,
        build_id: &str,
        base_image: &str,
        layer: &mut ImageLayer,
        global: &mut GlobalContext,
        parent: &mut Option<String>,
        tags: &[ImageTag],
    ) -> Result<()> {
        // State after the layer, without running it
        let mut resolved = global.clone();
        let base = parent.is_none().then_some(base_image);
        layer.resolve(base, &mut resolved, &self.config)?;

        if let Some(image_id) = self.cache.get_layer(parent.as_deref(), layer)? {
            tracing::info!(layer = layer.number, image_id = %image_id, "Using cached layer");
            self.emit_layer("layer.cached", build_id, layer, &image_id);
            if layer.is_last {
                for tag in tags {
                    self.client.tag_image(&image_id, tag).await?;
                }
            }
            *global = resolved;
            *parent = Some(image_id);
            return Ok(());
        }

        let image = match parent.as_deref() {
            Some(image) => image.to_string(),
            None => self.base_image_id(base_image).await?,
        };

        let container = self
            .client
            .run_container_infinitely(
                &image,
                &self.config.infinite_command,
                &self.config.volumes,
                &self.config.container_limits,
            )
            .await?;
        layer.context.container = Some(container.clone());
        tracing::info!(layer = layer.number, container = %container, image = %image, "Started build container");
        self.emit_layer("layer.container_created", build_id, layer, &container);

        for command in layer.commands.iter_mut() {
            command
                .call(
                    self.client.as_ref(),
                    global,
                    &mut layer.context,
                    self.build_context.as_ref(),
                    &self.config,
                )
                .await?;
        }

        self.client.stop_container(&container).await?;

        let mut conf = layer.context.commit_config();
        let commit_tags: &[ImageTag] = if layer.is_last {
            conf.labels.extend(self.config.labels.clone());
            tags
        } else {
            &[]
        };
        let image_id = self
            .client
            .commit_container(
                &container,
                &conf,
                layer.context.author.as_deref(),
                &layer.commit_message,
                commit_tags,
            )
            .await?;
        tracing::info!(layer = layer.number, image_id = %image_id, "Committed layer");
        self.emit_layer("layer.committed", build_id, layer, &image_id);

        self.cache.add(&image_id, parent.as_deref(), layer)?;

        if self.config.rm {
            if let Some(container) = layer.context.container.take() {
                self.client.remove_container(&container).await?;
            }
        }

        *parent = Some(image_id);
        Ok(())
    }

    /// Id of the base image, pulling it when missing or when `pull` is set.
    async fn base_image_id(&self, base_image: &str) -> Result<String> {
        let existing = self.client.get_image(base_image).await?;
        if let Some(id) = existing.as_ref().filter(|_| !self.config.pull) {
            return Ok(id.clone());
        }

        tracing::info!(image = %base_image, "Pulling base image");
        if let Some(id) = self.client.pull_image(base_image).await? {
            return Ok(id);
        }

        match self.client.get_image(base_image).await? {
            Some(id) => Ok(id),
            None => existing.ok_or_else(|| {
                KilnError::client(
                    "pull_image",
                    format!("image {} is not available after pulling", base_image),
                )
            }),
        }
    }

    /// With `forcerm`, remove the container left by a failed layer.
    async fn remove_failed_container(&self, layer: &mut ImageLayer) {
        if !self.config.forcerm {
            return;
        }
        if let Some(container) = layer.context.container.take() {
            tracing::info!(layer = layer.number, container = %container, "Removing container of failed layer");
            if let Err(e) = self.client.remove_container(&container).await {
                tracing::warn!(container = %container, error = %e, "Failed to remove container");
            }
        }
    }

    fn emit(&self, event: BuildEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    fn emit_layer(&self, key: &str, build_id: &str, layer: &ImageLayer, id: &str) {
        if self.events.is_none() {
            return;
        }
        let mut payload = HashMap::new();
        payload.insert("layer".to_string(), serde_json::json!(layer.number));
        payload.insert("id".to_string(), serde_json::json!(id));
        self.emit(BuildEvent::with_map(key, build_id, payload));
    }
}
