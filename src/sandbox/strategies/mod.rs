mod bridge;
mod frame;
#[cfg(feature = "wasmer")]
mod wasmer;
mod worker;

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

pub use bridge::{Interpreter, LoadState, RuntimeBridge};
pub use frame::{escape_html, frame_document, FrameHandle, RenderingFrame};
pub use worker::BackgroundContext;

/// PATH given to sandboxed processes in place of the host's.
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Command for a sandboxed child: fresh working directory, cleared
/// environment, piped stdio, killed when its handle is dropped.
fn sandboxed_command(program: &Path, workdir: &Path) -> Command {
    let mut command = Command::new(program);
    command
        .current_dir(workdir)
        .env_clear()
        .env("PATH", SANDBOX_PATH)
        .env("HOME", workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(windows)]
    if let Ok(root) = std::env::var("SystemRoot") {
        command.env("SystemRoot", root);
    }

    command
}
