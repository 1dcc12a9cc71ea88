use clap_markdown::help_markdown;
use fs_rr::cli::Cli;

fn main() {
    println!("# fs-rr CLI Reference");
    println!();
    println!("This page contains the auto-generated reference documentation for the `fs-rr` command-line interface.");
    println!();
    println!("{}", help_markdown::<Cli>());
}
