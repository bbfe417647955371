//! Args command handler.

use llamactl_core::ServerConfig;
use llamactl_runtime::launch_spec;

/// Render the command line supervised for `config`, one shell word per arg.
pub fn render_command(config: &ServerConfig) -> String {
    let spec = launch_spec(config);
    std::iter::once(spec.binary.display().to_string())
        .chain(spec.args.iter().map(|arg| quote(arg)))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn execute(config: &ServerConfig) {
    println!("{}", render_command(config));
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("'{arg}'")
    } else {
        arg.to_string()
    }
}
