//! Humans: peers driven by lines read from a console.

use crate::broker::{Backend, Transport};
use crate::error::LlmuxError;
use crate::handler::{Handler, TaskContext, Work};
use crate::peer::agent::run_directives;
use crate::peer::{ConsoleParser, PeerConfig};
use crate::types::PeerKind;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Read one line and send it. End of input shuts the system down.
pub struct ConsoleWork<T>
where
    T: Transport<Payload = String, Output = Option<String>>,
{
    input: Arc<Backend<T>>,
}

impl<T> ConsoleWork<T>
where
    T: Transport<Payload = String, Output = Option<String>>,
{
    pub fn new(input: Arc<Backend<T>>) -> Self {
        Self { input }
    }
}

#[async_trait]
impl<T> Work for ConsoleWork<T>
where
    T: Transport<Payload = String, Output = Option<String>>,
{
    async fn run(&self, ctx: TaskContext) -> Result<(), LlmuxError> {
        let prompt = format!("{}: ", ctx.peer.name());
        let Some(line) = self.input.dispatch(ctx.peer.name(), prompt).await else {
            info!(peer = %ctx.peer.name(), "Console input closed");
            ctx.system.request_shutdown();
            return Ok(());
        };
        if line.trim().is_empty() {
            return Ok(());
        }
        let parsed = ctx.peer.send_message(&line);
        run_directives(&ctx, &parsed.directives).await;
        Ok(())
    }
}

/// Configuration for a console user reading through `input`.
pub fn human_config<T>(name: impl Into<String>, input: Arc<Backend<T>>) -> PeerConfig
where
    T: Transport<Payload = String, Output = Option<String>>,
{
    let work: Arc<dyn Work> = Arc::new(ConsoleWork::new(input));
    PeerConfig::new(name, PeerKind::Human, Arc::new(ConsoleParser::default()))
        .with_handler(Handler::always("console", work))
}
