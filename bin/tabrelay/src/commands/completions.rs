use clap_complete::{generate, Shell};

/// Generate shell completion scripts.
///
/// Re-creates a minimal CLI definition here to generate completions
/// without a circular dependency on the main Cli struct.
pub async fn run(shell: &str) -> anyhow::Result<()> {
    let shell = match shell.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "powershell" | "ps" => Shell::PowerShell,
        "elvish" => Shell::Elvish,
        _ => {
            anyhow::bail!(
                "Unsupported shell: {}. Options: bash, zsh, fish, powershell, elvish",
                shell
            );
        }
    };

    let mut cmd = build_cli();
    generate(shell, &mut cmd, "tabrelay", &mut std::io::stdout());

    eprintln!();
    eprintln!("# Usage:");
    match shell {
        Shell::Bash => {
            eprintln!("#   tabrelay completions bash > ~/.local/share/bash-completion/completions/tabrelay");
            eprintln!("#   or: eval \"$(tabrelay completions bash)\"");
        }
        Shell::Zsh => {
            eprintln!("#   tabrelay completions zsh > ~/.zfunc/_tabrelay");
            eprintln!("#   Make sure fpath includes ~/.zfunc and run compinit");
        }
        Shell::Fish => {
            eprintln!("#   tabrelay completions fish > ~/.config/fish/completions/tabrelay.fish");
        }
        _ => {}
    }

    Ok(())
}

/// Build a minimal CLI definition for completion generation.
fn build_cli() -> clap::Command {
    clap::Command::new("tabrelay")
        .about("Remote browser-automation relay")
        .subcommand(clap::Command::new("bridge").about("Start the WebSocket bridge server"))
        .subcommand(clap::Command::new("host").about("Run the browser host on stdio"))
        .subcommand(clap::Command::new("send").about("Send a single command to a running bridge"))
        .subcommand(clap::Command::new("doctor").about("Run environment diagnostics"))
        .subcommand(clap::Command::new("completions").about("Generate shell completions"))
}
