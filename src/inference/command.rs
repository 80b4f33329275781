use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::models::{install_dir, load_local_manifest, ModelReference};

use super::engine::{retain_confident, ImageLabel, LabelInference, Labeler, LabelerOptions};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const ENV_CMD: &str = "LABELER_CMD";
const ENV_ARGS: &str = "LABELER_ARGS";
const ENV_TIMEOUT: &str = "LABELER_TIMEOUT_SECS";

#[derive(Debug)]
struct CommandSpec {
    path: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

/// Labels images by running an external executable that prints a JSON array
/// of `{"text", "confidence"}` objects.
#[derive(Debug)]
pub struct CommandLabeling {
    command: Arc<CommandSpec>,
    models_root: PathBuf,
    assets_dir: PathBuf,
}

impl CommandLabeling {
    pub fn new(
        path: PathBuf,
        args: Vec<String>,
        timeout: Duration,
        models_root: PathBuf,
        assets_dir: PathBuf,
    ) -> Self {
        Self {
            command: Arc::new(CommandSpec {
                path,
                args,
                timeout,
            }),
            models_root,
            assets_dir,
        }
    }

    pub fn from_env(models_root: PathBuf, assets_dir: PathBuf) -> Result<Self> {
        let cmd = std::env::var(ENV_CMD)
            .map(PathBuf::from)
            .map_err(|_| anyhow!("{ENV_CMD} not set; no labeling backend available"))?;
        if !cmd.exists() {
            return Err(anyhow!("{} points to missing binary: {:?}", ENV_CMD, cmd));
        }

        let args = std::env::var(ENV_ARGS)
            .map(|value| value.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default();

        let timeout = std::env::var(ENV_TIMEOUT)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self::new(cmd, args, timeout, models_root, assets_dir))
    }

    fn model_path(&self, model: &ModelReference) -> Result<PathBuf> {
        match model {
            ModelReference::Remote(remote) => {
                let dir = install_dir(&self.models_root, remote.name());
                if !dir.exists() {
                    return Err(anyhow!(
                        "remote model {} is not installed at {}",
                        remote.name(),
                        dir.display()
                    ));
                }
                Ok(dir)
            }
            ModelReference::Local(local) => {
                Ok(load_local_manifest(&self.assets_dir, local)?.model_file)
            }
        }
    }
}

impl LabelInference for CommandLabeling {
    fn build_labeler(&self, options: &LabelerOptions) -> Result<Box<dyn Labeler>> {
        let model_path = self.model_path(options.model())?;
        debug!(model = %options.model(), path = ?model_path, "labeler built");
        Ok(Box::new(CommandLabeler {
            command: self.command.clone(),
            model_path,
            threshold: options.confidence_threshold(),
        }))
    }
}

struct CommandLabeler {
    command: Arc<CommandSpec>,
    model_path: PathBuf,
    threshold: f32,
}

impl Labeler for CommandLabeler {
    fn process_image(&self, locator: &str) -> Result<Vec<ImageLabel>> {
        let stdout = self.run(locator)?;
        let labels: Vec<ImageLabel> = serde_json::from_str(stdout.trim())
            .context("labeling command printed malformed json")?;
        Ok(retain_confident(labels, self.threshold))
    }
}

impl CommandLabeler {
    fn run(&self, locator: &str) -> Result<String> {
        let spec = self.command.as_ref();
        let mut child = Command::new(&spec.path)
            .args(&spec.args)
            .arg("--model")
            .arg(&self.model_path)
            .arg("--threshold")
            .arg(self.threshold.to_string())
            .arg(locator)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn labeling command {:?}", spec.path))?;

        // Drain stdout concurrently so a chatty labeler cannot fill the pipe.
        let mut stdout = child
            .stdout
            .take()
            .context("stdout handle unavailable for labeling command")?;
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().context("failed polling labeling command")? {
                break status;
            }
            if start.elapsed() > spec.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(anyhow!(
                    "labeling command exceeded {:?} timeout",
                    spec.timeout
                ));
            }
            thread::sleep(Duration::from_millis(20));
        };

        let output = reader
            .join()
            .map_err(|_| anyhow!("labeling stdout reader panicked"))?
            .context("failed reading labeling command stdout")?;

        if !status.success() {
            let mut stderr = Vec::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_end(&mut stderr);
            }
            return Err(anyhow!(
                "labeling command exited with status {:?}: {}",
                status.code(),
                String::from_utf8_lossy(&stderr).trim()
            ));
        }

        String::from_utf8(output).context("labeling command returned non-UTF8 text")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use super::*;
    use crate::models::{LocalModel, RemoteModel};

    fn shell_labeling(script: &str, root: &std::path::Path, timeout: Duration) -> CommandLabeling {
        CommandLabeling::new(
            PathBuf::from("/bin/sh"),
            vec!["-c".into(), script.into(), "labeler".into()],
            timeout,
            root.join("models"),
            root.join("assets"),
        )
    }

    fn remote_options(root: &std::path::Path) -> LabelerOptions {
        fs::create_dir_all(install_dir(&root.join("models"), "event_demo_dataset")).unwrap();
        LabelerOptions::new(ModelReference::Remote(
            RemoteModel::new("event_demo_dataset").unwrap(),
        ))
    }

    #[test]
    fn parses_and_filters_command_output() {
        let dir = tempfile::tempdir().unwrap();
        let labeling = shell_labeling(
            r#"echo '[{"text":"cat","confidence":0.87},{"text":"dog","confidence":0.2}]'"#,
            dir.path(),
            Duration::from_secs(10),
        );
        let labeler = labeling.build_labeler(&remote_options(dir.path())).unwrap();
        let labels = labeler.process_image("/tmp/cat.jpg").unwrap();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].text, "cat");
        assert!((labels[0].confidence - 0.87).abs() < 1e-6);
    }

    #[test]
    fn passes_model_threshold_and_image() {
        let dir = tempfile::tempdir().unwrap();
        let labeling = shell_labeling(
            r#"echo "[{\"text\":\"$4|$5\",\"confidence\":0.9}]""#,
            dir.path(),
            Duration::from_secs(10),
        );
        let labeler = labeling.build_labeler(&remote_options(dir.path())).unwrap();
        let labels = labeler.process_image("photo.png").unwrap();
        assert_eq!(labels[0].text, "0.5|photo.png");
    }

    #[test]
    fn failing_command_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let labeling = shell_labeling(
            "echo 'model corrupt' >&2; exit 3",
            dir.path(),
            Duration::from_secs(10),
        );
        let labeler = labeling.build_labeler(&remote_options(dir.path())).unwrap();
        let error = labeler.process_image("photo.png").unwrap_err();
        assert!(error.to_string().contains("model corrupt"));
    }

    #[test]
    fn slow_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let labeling = shell_labeling("sleep 5", dir.path(), Duration::from_millis(100));
        let labeler = labeling.build_labeler(&remote_options(dir.path())).unwrap();
        let error = labeler.process_image("photo.png").unwrap_err();
        assert!(error.to_string().contains("timeout"));
    }

    #[test]
    fn uninstalled_remote_model_cannot_build() {
        let dir = tempfile::tempdir().unwrap();
        let labeling = shell_labeling("echo '[]'", dir.path(), Duration::from_secs(1));
        let options = LabelerOptions::new(ModelReference::Remote(
            RemoteModel::new("event_demo_dataset").unwrap(),
        ));
        assert!(labeling.build_labeler(&options).is_err());
    }

    #[test]
    fn local_model_resolves_through_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let events = dir.path().join("assets").join("events");
        fs::create_dir_all(&events).unwrap();
        fs::write(
            events.join("manifest.json"),
            r#"{"modelFile":"model.tflite","labelsFile":"dict.txt"}"#,
        )
        .unwrap();
        let labeling = shell_labeling(
            r#"echo "[{\"text\":\"$2\",\"confidence\":0.9}]""#,
            dir.path(),
            Duration::from_secs(10),
        );
        let options =
            LabelerOptions::new(ModelReference::Local(LocalModel::new("events/manifest.json")));
        let labels = labeling
            .build_labeler(&options)
            .unwrap()
            .process_image("photo.png")
            .unwrap();
        assert_eq!(
            PathBuf::from(&labels[0].text),
            events.join("model.tflite")
        );
    }
}
