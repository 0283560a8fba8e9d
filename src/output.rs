//! Text vs JSON rendering for command output.

use std::io::Write;

use serde::Serialize;

use tms_deploy::Result;

use crate::cli::OutputFormat;

pub struct OutputWriter {
    format: OutputFormat,
}

impl OutputWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn render<T: Render + Serialize>(&self, payload: &T) -> Result<()> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        match self.format {
            OutputFormat::Text => {
                payload.render_text(&mut handle)?;
            }
            OutputFormat::Json => {
                serde_json::to_writer_pretty(&mut handle, payload)?;
                writeln!(handle)?;
            }
        }
        Ok(())
    }
}

/// Human-readable rendering, implemented next to `Serialize` by every
/// command payload.
pub trait Render {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()>;
}
