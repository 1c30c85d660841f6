use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every validation rule and report the results
    Validate {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the startup stages without starting anything
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate, then start the stack stage by stage
    Up {
        /// Return once every stage is up instead of holding the stack until interrupted
        #[arg(short, long)]
        detach: bool,

        /// Start even when ERROR-severity rules fail (CRITICAL always blocks)
        #[arg(long)]
        ignore_errors: bool,
    },
    /// Stop everything a previous `up` started
    Down,
    /// List tracked services and whether they are still running
    Status {
        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },
}
