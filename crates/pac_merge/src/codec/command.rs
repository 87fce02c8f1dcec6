//! [`ArchiveCodec`] backed by an external command-line tool.
//!
//! Each operation runs the configured program once with an argument template.
//! Templates may use the placeholders `{input}`, `{output}` and `{manifest}`.
//! The call is synchronous and bounded: success means the process exited with
//! status 0 within the timeout and, for `unpack`/`pack`, that the expected output
//! exists. A process that outlives the timeout is killed.

use super::{ArchiveCodec, CodecResult};
use crate::error::CodecError;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default timeout for a single codec invocation.
pub const DEFAULT_CODEC_TIMEOUT_SECS: u64 = 300;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long output readers may keep draining after the child is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Program and argument templates for the external archive tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct CodecCommands {
    /// Executable to run (absolute path or a name on `PATH`).
    pub program: String,
    pub decrypt_args: Vec<String>,
    pub encrypt_args: Vec<String>,
    pub unpack_args: Vec<String>,
    pub pack_args: Vec<String>,
    /// Seconds before a running invocation is killed. `0` disables the timeout.
    pub timeout_secs: u64,
}

impl Default for CodecCommands {
    fn default() -> Self {
        let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            program: "GeoArcSysAIOCLITool".to_string(),
            decrypt_args: args(&[
                "crypt", "{input}", "-m", "decrypt", "-p", "{manifest}", "-o", "overwrite",
            ]),
            encrypt_args: args(&["crypt", "{input}", "-m", "encrypt", "-o", "overwrite"]),
            unpack_args: args(&[
                "pac", "{input}", "-m", "unpack", "-of", "{output}", "-o", "overwrite",
            ]),
            pack_args: args(&[
                "pac", "{input}", "-m", "pack", "-of", "{output}", "-o", "overwrite",
            ]),
            timeout_secs: DEFAULT_CODEC_TIMEOUT_SECS,
        }
    }
}

impl CodecCommands {
    fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Runs the external archive tool as a child process per operation.
#[derive(Debug, Clone)]
pub struct CommandCodec {
    commands: CodecCommands,
}

impl CommandCodec {
    pub fn new(commands: CodecCommands) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &CodecCommands {
        &self.commands
    }

    fn run(
        &self,
        operation: &'static str,
        template: &[String],
        input: &Utf8Path,
        output: Option<&Utf8Path>,
        manifest: Option<&Utf8Path>,
    ) -> CodecResult<()> {
        let args = expand_args(template, input, output, manifest);
        tracing::debug!(
            "Codec {}: {} {}",
            operation,
            self.commands.program,
            args.join(" ")
        );

        let start = Instant::now();
        let mut child = Command::new(&self.commands.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CodecError::Spawn {
                program: self.commands.program.clone(),
                source,
            })?;

        let readers = [
            child.stdout.take().map(|s| forward_lines(s, "stdout")),
            child.stderr.take().map(|s| forward_lines(s, "stderr")),
        ];

        let waited = wait_with_timeout(&mut child, self.commands.timeout());
        join_readers(readers.into_iter().flatten().collect());

        let status = match waited.map_err(CodecError::Io)? {
            Some(status) => status,
            None => {
                tracing::warn!(
                    "Codec {} timed out after {:?}, killed (path={})",
                    operation,
                    start.elapsed(),
                    input
                );
                return Err(CodecError::TimedOut {
                    operation,
                    path: input.to_path_buf(),
                    timeout: self.commands.timeout().unwrap_or_default(),
                });
            }
        };

        if !status.success() {
            return Err(CodecError::Failed {
                operation,
                path: input.to_path_buf(),
                status: status.to_string(),
            });
        }

        if let Some(output) = output {
            if !output.exists() {
                return Err(CodecError::MissingOutput {
                    operation,
                    path: output.to_path_buf(),
                });
            }
        }

        tracing::debug!(
            "Codec {} complete path={} elapsed_ms={}",
            operation,
            input,
            start.elapsed().as_millis()
        );
        Ok(())
    }
}

impl ArchiveCodec for CommandCodec {
    fn decrypt(&self, archive: &Utf8Path, manifest: &Utf8Path) -> CodecResult<()> {
        self.run(
            "decrypt",
            &self.commands.decrypt_args,
            archive,
            None,
            Some(manifest),
        )
    }

    fn encrypt(&self, archive: &Utf8Path) -> CodecResult<()> {
        self.run("encrypt", &self.commands.encrypt_args, archive, None, None)
    }

    fn unpack(&self, archive: &Utf8Path, out_dir: &Utf8Path) -> CodecResult<()> {
        self.run(
            "unpack",
            &self.commands.unpack_args,
            archive,
            Some(out_dir),
            None,
        )
    }

    fn pack(&self, dir: &Utf8Path, out_archive: &Utf8Path) -> CodecResult<()> {
        self.run(
            "pack",
            &self.commands.pack_args,
            dir,
            Some(out_archive),
            None,
        )
    }
}

/// Substitute placeholders in an argument template.
fn expand_args(
    template: &[String],
    input: &Utf8Path,
    output: Option<&Utf8Path>,
    manifest: Option<&Utf8Path>,
) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            let mut arg = arg.replace("{input}", input.as_str());
            if let Some(output) = output {
                arg = arg.replace("{output}", output.as_str());
            }
            if let Some(manifest) = manifest {
                arg = arg.replace("{manifest}", manifest.as_str());
            }
            arg
        })
        .collect()
}

/// Forward a child's output stream to trace logs on a background thread.
fn forward_lines<R: Read + Send + 'static>(stream: R, name: &'static str) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            match line {
                Ok(line) => tracing::trace!("[codec {}] {}", name, line),
                Err(_) => break,
            }
        }
    })
}

/// Join the output readers, detaching any still running after [`READER_GRACE`].
///
/// A reader only finishes once every holder of the pipe closes it, which a
/// helper process spawned by the tool can delay indefinitely.
fn join_readers(readers: Vec<JoinHandle<()>>) {
    let deadline = Instant::now() + READER_GRACE;
    while Instant::now() < deadline && !readers.iter().all(|r| r.is_finished()) {
        std::thread::sleep(POLL_INTERVAL);
    }
    for reader in readers {
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            tracing::debug!("Codec output still open after exit, detaching reader");
        }
    }
}

/// Wait for the child to exit. Returns `Ok(None)` if it was killed on timeout.
fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
) -> std::io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
