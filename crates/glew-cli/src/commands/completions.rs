use super::EXIT_SUCCESS;
use clap::CommandFactory;
use clap_complete::Shell;
use std::io::Write;

fn write_script<C: CommandFactory>(shell: Shell, out: &mut dyn Write) {
    let mut cmd = C::command();
    let bin = cmd.get_name().to_owned();
    clap_complete::generate(shell, &mut cmd, bin, out);
}

pub fn run<C: CommandFactory>(shell: Shell) -> Result<u8, String> {
    let mut stdout = std::io::stdout().lock();
    write_script::<C>(shell, &mut stdout);
    stdout
        .flush()
        .map_err(|e| format!("failed to write completions: {e}"))?;
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    #[command(name = "glew")]
    struct SampleCli {
        #[arg(long)]
        data_dir: Option<String>,
    }

    #[test]
    fn script_names_the_binary() {
        let mut buf = Vec::new();
        write_script::<SampleCli>(Shell::Bash, &mut buf);
        let script = String::from_utf8(buf).unwrap();
        assert!(script.contains("_glew"));
        assert!(script.contains("--data-dir"));
    }
}
