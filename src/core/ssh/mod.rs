mod client;

pub use client::{execute_local, is_local_host, CommandOutput, SshClient};
