use std::process::Stdio;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::engines::{SpeechCompletion, TextToSpeech};
use crate::sync::lock;

/// Speaks by running an external command (`say`, `espeak`, ...) with the
/// text as its last argument. One utterance at a time; a new one cuts off
/// the previous.
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
    runtime: Handle,
    current: Mutex<Option<oneshot::Sender<()>>>,
}

impl CommandSpeaker {
    /// `command` is split on whitespace into program and leading arguments.
    pub fn new(command: &str, runtime: Handle) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().ok_or_else(|| anyhow!("empty tts command"))?;
        Ok(Self {
            program,
            args: parts.collect(),
            runtime,
            current: Mutex::new(None),
        })
    }
}

impl TextToSpeech for CommandSpeaker {
    fn speak(&self, text: &str, on_complete: SpeechCompletion) -> Result<()> {
        self.cancel();

        let mut child = {
            let _runtime = self.runtime.enter();
            tokio::process::Command::new(&self.program)
                .args(&self.args)
                .arg(text)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("spawning '{}'", self.program))?
        };

        let (stop_tx, mut stop_rx) = oneshot::channel();
        *lock(&self.current) = Some(stop_tx);

        self.runtime.spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if !status.success() => warn!(%status, "tts command exited with failure"),
                    Ok(_) => {}
                    Err(e) => warn!("waiting for tts command: {}", e),
                },
                _ = &mut stop_rx => {
                    debug!("Speech cancelled");
                    let _ = child.kill().await;
                }
            }
            on_complete();
        });
        Ok(())
    }

    fn cancel(&self) {
        if let Some(stop) = lock(&self.current).take() {
            let _ = stop.send(());
        }
    }
}
