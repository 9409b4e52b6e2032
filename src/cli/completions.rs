use crate::cli::args::{Cli, CompletionCommands};
use crate::utils::errors::Result;
use clap::CommandFactory;
use clap_complete::{generate, Shell};
use std::io;

const APP_NAME: &str = "pki-revocation";

pub fn handle_completion_command(command: &CompletionCommands) -> Result<()> {
    let shell = command.shell();
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, APP_NAME, &mut io::stdout());

    // Bash also completes serials after `revoke`
    if matches!(shell, Shell::Bash) {
        print!("{}", bash_serial_completion());
    }
    Ok(())
}

fn bash_serial_completion() -> String {
    format!(
        r#"
_{name}_complete_serials() {{
    local serials
    serials=$({app} completion-helper serials 2>/dev/null)
    COMPREPLY=($(compgen -W "$serials" -- "${{cur}}"))
}}

_{name}_override() {{
    local cur prev
    cur="${{COMP_WORDS[COMP_CWORD]}}"
    prev="${{COMP_WORDS[COMP_CWORD-1]}}"
    if [[ "$prev" == "revoke" ]]; then
        _{name}_complete_serials
        return 0
    fi
    # Fall back to the generated completion
    _{app} "$@"
}}

complete -F _{name}_override -o bashdefault -o default {app}
"#,
        name = APP_NAME.replace('-', "_"),
        app = APP_NAME,
    )
}
