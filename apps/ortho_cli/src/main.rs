use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use shared::protocol::{HostMessage, WidgetConfig};
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{info, warn};
use viewer_core::{
    config::load_settings_from, load_settings, CommandRouter, OrthoWidget, WidgetSettings,
};
use viewer_integration::{
    headless::{HeadlessSurface, HeadlessToolkit, RecordingPanel, RecordingStatusDisplay},
    ChannelHostTransport, Interaction, KeyInput,
};

/// Drives one headless viewer mount and prints every host event as a JSON line.
#[derive(Parser, Debug)]
struct Args {
    /// Widget configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
    /// One JSON step per line: a host command, `{"sleep_ms": n}`,
    /// `{"resize": [w, h]}` or `{"key": "ArrowUp", "shift": false}`.
    #[arg(long)]
    script: Option<PathBuf>,
    #[arg(long, default_value = "viewer1")]
    mount: String,
    /// Settings file; `ortho_viewer.toml` in the working directory otherwise.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// How long the watchers keep running after the script.
    #[arg(long, default_value_t = 250)]
    linger_ms: u64,
    /// Run without a host connection: no events are printed and queries go unanswered.
    #[arg(long)]
    offline: bool,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Step {
    Sleep {
        sleep_ms: u64,
    },
    Resize {
        resize: [u32; 2],
    },
    Key {
        key: String,
        #[serde(default)]
        shift: bool,
    },
    Command(Value),
}

fn read_config(path: &Path) -> Result<WidgetConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading configuration {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing configuration {}", path.display()))
}

fn read_script(path: &Path) -> Result<Vec<Step>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: not a script step", path.display(), index + 1))
        })
        .collect()
}

async fn run_script(
    steps: Vec<Step>,
    widget: &OrthoWidget,
    router: &CommandRouter,
    mount: &str,
) {
    for step in steps {
        match step {
            Step::Sleep { sleep_ms } => tokio::time::sleep(Duration::from_millis(sleep_ms)).await,
            Step::Resize { resize: [width, height] } => widget.resize(width, height).await,
            Step::Key { key, shift } => {
                let input = if shift {
                    KeyInput::new(key).with_shift()
                } else {
                    KeyInput::new(key)
                };
                match widget.handle_interaction(Interaction::KeyDown(input)).await {
                    Some(disposition) => info!(?disposition, "key handled"),
                    None => warn!("key ignored: no viewer yet"),
                }
            }
            Step::Command(mut payload) => {
                if let Some(fields) = payload.as_object_mut() {
                    fields
                        .entry("id")
                        .or_insert_with(|| Value::String(mount.to_string()));
                }
                let delivered = router
                    .dispatch(HostMessage {
                        name: router.message().to_string(),
                        payload,
                    })
                    .await;
                if !delivered {
                    warn!("script command not delivered");
                }
            }
        }
    }
}

fn spawn_printer(mut events: broadcast::Receiver<HostMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(message) => {
                    println!("{}", json!({ "event": message.name, "payload": message.payload }))
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn settings(args: &Args) -> WidgetSettings {
    match &args.settings {
        Some(path) => load_settings_from(path, |key| std::env::var(key).ok()),
        None => load_settings(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    let settings = settings(&args);

    let config = args.config.as_deref().map(read_config).transpose()?;
    let steps = match args.script.as_deref() {
        Some(path) => read_script(path)?,
        None => Vec::new(),
    };

    let mount = Arc::new(HeadlessSurface::new(args.mount.clone()));
    let toolkit = Arc::new(HeadlessToolkit::new());
    let (widget, host) = if args.offline {
        (OrthoWidget::new(mount, toolkit, settings.clone()), None)
    } else {
        let transport = Arc::new(ChannelHostTransport::new(settings.event_capacity));
        let printer = spawn_printer(transport.subscribe_events());
        let widget = OrthoWidget::new_with_dependencies(
            mount,
            toolkit,
            transport.clone(),
            Arc::new(RecordingPanel::new()),
            Arc::new(RecordingStatusDisplay::new()),
            settings.clone(),
        );
        (widget, Some((transport, printer)))
    };
    let router = Arc::new(CommandRouter::new(settings.command_message.clone()));
    router.register(&widget).await;
    let listener = host
        .as_ref()
        .map(|(transport, _)| router.spawn(transport.as_ref()));

    widget
        .render_value(config)
        .await
        .context("initializing the viewer")?;
    run_script(steps, &widget, &router, &args.mount).await;
    tokio::time::sleep(Duration::from_millis(args.linger_ms)).await;

    if let Some(readout) = widget.status() {
        println!("{}", json!({ "status": readout.accessible_label }));
    }
    info!(mount = %args.mount, offline = args.offline, "script finished");

    widget.shutdown();
    if let Some(listener) = listener {
        listener.abort();
    }
    if let Some((_, printer)) = host {
        // Let the printer flush what is already queued.
        tokio::time::sleep(Duration::from_millis(20)).await;
        printer.abort();
    }
    Ok(())
}
