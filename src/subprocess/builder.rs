use std::collections::HashMap;
use std::path::Path;

use crate::subprocess::streaming::ChannelMode;
use crate::subprocess::ProcessCommand;

pub struct ProcessCommandBuilder {
    command: ProcessCommand,
}

impl ProcessCommandBuilder {
    pub fn new(program: &str) -> Self {
        Self {
            command: ProcessCommand {
                program: program.to_string(),
                args: Vec::new(),
                env: HashMap::new(),
                working_dir: None,
                channel_mode: ChannelMode::default(),
                extra_fds: Vec::new(),
            },
        }
    }

    /// Build from an argv-style vector; `None` when it is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program).args(args))
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.command.args.push(arg.to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.command
            .args
            .extend(args.into_iter().map(|s| s.as_ref().to_string()));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.command.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.command.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn channel_mode(mut self, mode: ChannelMode) -> Self {
        self.command.channel_mode = mode;
        self
    }

    pub fn extra_fd(mut self, fd: i32) -> Self {
        self.command.extra_fds.push(fd);
        self
    }

    pub fn extra_fds<I>(mut self, fds: I) -> Self
    where
        I: IntoIterator<Item = i32>,
    {
        self.command.extra_fds.extend(fds);
        self
    }

    pub fn build(self) -> ProcessCommand {
        self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_argv_splits_program() {
        let argv = vec!["make".to_string(), "-j4".to_string(), "all".to_string()];
        let command = ProcessCommandBuilder::from_argv(&argv).unwrap().build();
        assert_eq!(command.program, "make");
        assert_eq!(command.args, vec!["-j4", "all"]);
        assert_eq!(command.display(), "make -j4 all");
        assert!(ProcessCommandBuilder::from_argv(&[]).is_none());
    }

    #[test]
    fn test_defaults_to_pty_mode() {
        let command = ProcessCommandBuilder::new("true").build();
        assert_eq!(command.channel_mode, ChannelMode::Pty);
        assert!(command.extra_fds.is_empty());
    }
}
