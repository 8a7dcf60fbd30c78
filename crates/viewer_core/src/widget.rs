use std::sync::Arc;

use shared::protocol::{Command, WidgetConfig};
use tracing::debug;
use viewer_integration::{
    HostTransport, Interaction, LayerPanel, MissingHostTransport, MountSurface, NoopLayerPanel,
    NoopStatusDisplay, StatusDisplay, StatusReadout, ViewerToolkit,
};

use crate::{
    animator::CrosshairAnimator,
    bridge::{Disposition, EventBridge},
    commands::CommandEngine,
    config::WidgetSettings,
    error::SessionError,
    session::{ViewerHandles, ViewerSession},
    status::StatusReporter,
};

/// One mounted viewer: the entry points the host drives.
pub struct OrthoWidget {
    session: Arc<ViewerSession>,
    engine: CommandEngine,
    bridge: Arc<EventBridge>,
    status: Arc<StatusReporter>,
}

impl OrthoWidget {
    /// A widget with no host connection, side panel or status display.
    /// Events are dropped and queries go unanswered.
    pub fn new(
        mount: Arc<dyn MountSurface>,
        toolkit: Arc<dyn ViewerToolkit>,
        settings: WidgetSettings,
    ) -> Arc<Self> {
        Self::new_with_dependencies(
            mount,
            toolkit,
            Arc::new(MissingHostTransport),
            Arc::new(NoopLayerPanel),
            Arc::new(NoopStatusDisplay),
            settings,
        )
    }

    pub fn new_with_dependencies(
        mount: Arc<dyn MountSurface>,
        toolkit: Arc<dyn ViewerToolkit>,
        transport: Arc<dyn HostTransport>,
        panel: Arc<dyn LayerPanel>,
        display: Arc<dyn StatusDisplay>,
        settings: WidgetSettings,
    ) -> Arc<Self> {
        let status = Arc::new(StatusReporter::new(display, settings.frame_interval()));
        let animator = Arc::new(CrosshairAnimator::new(settings.frame_interval()));
        let bridge = Arc::new(EventBridge::new(
            mount.clone(),
            transport.clone(),
            status.clone(),
            animator.clone(),
            settings.clone(),
        ));
        let session = Arc::new(ViewerSession::new(
            mount,
            toolkit,
            panel,
            status.clone(),
            bridge.clone(),
        ));
        let engine = CommandEngine::new(session.clone(), transport, animator, settings);
        Arc::new(Self {
            session,
            engine,
            bridge,
            status,
        })
    }

    pub fn id(&self) -> &str {
        self.session.mount_id()
    }

    /// Takes a (re)rendered configuration: stores it, makes sure the viewer exists,
    /// then applies its inline commands in order.
    pub async fn render_value(&self, config: Option<WidgetConfig>) -> Result<(), SessionError> {
        let commands = config
            .as_ref()
            .map(|config| config.commands.clone())
            .unwrap_or_default();
        self.session.set_config(config).await;
        if self.session.ensure_ready().await?.is_none() {
            debug!(mount = self.id(), "render without configuration");
            return Ok(());
        }
        for command in commands {
            self.engine.apply(command).await?;
        }
        Ok(())
    }

    pub async fn resize(&self, width: u32, height: u32) {
        self.session.resize(width, height).await;
    }

    pub async fn apply_command(&self, command: Command) -> Result<(), SessionError> {
        self.engine.apply(command).await
    }

    pub async fn ensure_ready(&self) -> Result<Option<ViewerHandles>, SessionError> {
        self.session.ensure_ready().await
    }

    /// Dispatches a surface interaction directly, for surfaces that need the
    /// default-handling answer synchronously. `None` before the viewer exists.
    pub async fn handle_interaction(&self, interaction: Interaction) -> Option<Disposition> {
        let handles = self.session.handles().await?;
        Some(self.bridge.handle_interaction(&handles, interaction))
    }

    pub fn status(&self) -> Option<StatusReadout> {
        self.status.latest()
    }

    /// Stops watchers and pending hover emission ahead of the mount's own detach.
    pub fn shutdown(&self) {
        self.bridge.teardown();
    }
}
