use anyhow::Result;
use irtf_runner_common::{run_process, CommandLine, ProcessOutput, DEFAULT_STREAM_CAP_BYTES};

use crate::channel::Channel;

/// Starts a child VM and waits for it, servicing `channel` while the child runs.
pub trait VmLauncher {
    fn launch(&mut self, cmd: &CommandLine, channel: &mut Channel) -> Result<ProcessOutput>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemLauncher {
    stream_cap: usize,
}

impl SystemLauncher {
    pub fn new(stream_cap: usize) -> Self {
        Self { stream_cap }
    }
}

impl Default for SystemLauncher {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAP_BYTES)
    }
}

impl VmLauncher for SystemLauncher {
    fn launch(&mut self, cmd: &CommandLine, channel: &mut Channel) -> Result<ProcessOutput> {
        run_process(cmd, self.stream_cap, || channel.pump().map_err(Into::into))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn pumps_channel_while_child_runs() {
        let mut channel = Channel::open(Duration::from_secs(5)).unwrap();
        channel.begin_session();
        let mut cmd = CommandLine::new("/bin/sh");
        cmd.args(["-c", "echo launched"]);
        let out = SystemLauncher::default().launch(&cmd, &mut channel).unwrap();
        assert_eq!(out.stdout, "launched\n");
        assert!(out.success());
    }
}
