//! Command-line argument builder for llama-server.
//!
//! `build_args` is a pure function of the configuration: it never mutates
//! its input and the same input always yields the same argument list. A
//! `None` field never produces a flag.

use llamactl_core::{LaunchSpec, ServerConfig};

/// Build the ordered llama-server argument list for `config`.
pub fn build_args(config: &ServerConfig) -> Vec<String> {
    let mut args = Vec::new();

    push_value(&mut args, "--host", config.host.as_ref());
    push_value(&mut args, "--port", config.port);

    if let Some(path) = &config.model_path {
        args.push("--model".to_string());
        args.push(path.display().to_string());
    }
    if let Some(dir) = &config.models_dir {
        args.push("--models-dir".to_string());
        args.push(dir.display().to_string());
    }
    push_value(&mut args, "--models-max", config.models_max);
    push_switch(&mut args, "--no-models-autoload", config.models_autoload.map(|on| !on));

    // Context and batching
    push_value(&mut args, "--ctx-size", config.ctx_size);
    push_value(&mut args, "--batch-size", config.batch_size);
    push_value(&mut args, "--ubatch-size", config.ubatch_size);
    push_value(&mut args, "--threads", config.threads);
    push_value(&mut args, "--threads-http", config.threads_http);

    // GPU placement
    push_value(&mut args, "--n-gpu-layers", config.gpu_layers);
    push_value(&mut args, "--main-gpu", config.main_gpu);
    push_value(&mut args, "--split-mode", config.split_mode.as_ref());
    push_value(&mut args, "--tensor-split", config.tensor_split.as_ref());
    push_value(
        &mut args,
        "--flash-attn",
        config.flash_attn.map(|on| if on { "on" } else { "off" }),
    );

    // Memory
    push_switch(&mut args, "--no-mmap", config.mmap.map(|on| !on));
    push_switch(&mut args, "--mlock", config.mlock);

    push_switch(&mut args, "--jinja", config.jinja);
    push_switch(&mut args, "--metrics", config.metrics);

    // Sampling
    push_value(&mut args, "--temp", config.temperature);
    push_value(&mut args, "--top-k", config.top_k);
    push_value(&mut args, "--top-p", config.top_p);
    push_value(&mut args, "--min-p", config.min_p);
    push_value(&mut args, "--repeat-penalty", config.repeat_penalty);
    push_value(&mut args, "--presence-penalty", config.presence_penalty);
    push_value(&mut args, "--frequency-penalty", config.frequency_penalty);
    push_value(&mut args, "--mirostat", config.mirostat);
    push_value(&mut args, "--mirostat-lr", config.mirostat_lr);
    push_value(&mut args, "--mirostat-ent", config.mirostat_ent);
    push_value(&mut args, "--seed", config.seed);

    args.extend(config.extra_args.iter().cloned());
    args
}

/// Resolve the binary and arguments for one launch.
pub fn launch_spec(config: &ServerConfig) -> LaunchSpec {
    LaunchSpec {
        binary: config.binary.clone(),
        args: build_args(config),
    }
}

fn push_value<T: ToString>(args: &mut Vec<String>, flag: &str, value: Option<T>) {
    if let Some(value) = value {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}

fn push_switch(args: &mut Vec<String>, flag: &str, enabled: Option<bool>) {
    if enabled == Some(true) {
        args.push(flag.to_string());
    }
}
