use std::{path::PathBuf, process};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stimulus_ledger::{
    config::DEFAULT_STATE_FILE, Address, Amount, CallError, Chain, EventFilter, EventKind,
    LedgerConfig, StimulusConfig, StoreError,
};

//==================== CLI definition ====================//

#[derive(Parser)]
#[command(
    name = "stimulus",
    version,
    about = "Token ledger and stimulus reward engine over a local state file"
)]
struct Cli {
    /// Chain state file (created on first deployment)
    #[arg(long, global = true, env = "STIMULUS_STATE", default_value = DEFAULT_STATE_FILE)]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Caller {
    /// Identity the call is made under
    #[arg(long)]
    caller: Address,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy a ledger; the caller becomes master and holds the initial supply
    DeployLedger {
        #[command(flatten)]
        caller: Caller,
        /// JSON file with {name, symbol, initial_supply}
        #[arg(long, conflicts_with_all = ["name", "symbol", "supply"])]
        config: Option<PathBuf>,
        #[arg(long, default_value = "Stimulus Token")]
        name: String,
        #[arg(long, default_value = "STIM")]
        symbol: String,
        #[arg(long, default_value_t = 0)]
        supply: Amount,
    },
    /// Deploy a stimulus bound to a ledger; the caller becomes PI
    DeployStimulus {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        /// JSON file with {rewards: [5 amounts]}
        #[arg(long, conflicts_with = "rewards")]
        config: Option<PathBuf>,
        /// Five comma separated rewards: enrollment, then types 1..=4
        #[arg(long, value_delimiter = ',')]
        rewards: Vec<Amount>,
    },
    Balance {
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        account: Address,
    },
    Allowance {
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        owner: Address,
        #[arg(long)]
        spender: Address,
    },
    /// Print ledger metadata, supply and state root as JSON
    Inspect {
        #[arg(long)]
        ledger: Address,
    },
    Approve {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        spender: Address,
        #[arg(long)]
        amount: Amount,
    },
    Transfer {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: Amount,
    },
    TransferFrom {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        from: Address,
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: Amount,
    },
    IncreaseSupply {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        amount: Amount,
    },
    DecreaseSupply {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        amount: Amount,
    },
    ChangeMastery {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        new_master: Address,
    },
    ChangeName {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        name: String,
    },
    ChangeSymbol {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        symbol: String,
    },
    /// Approve an older ledger as a reclamation source
    Whitelist {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        old_ledger: Address,
    },
    /// Move an account's balance from a whitelisted older ledger
    Reclaim {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        ledger: Address,
        #[arg(long)]
        old_ledger: Address,
        #[arg(long)]
        account: Address,
        #[arg(long)]
        amount: Amount,
    },
    Enroll {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        stimulus: Address,
        #[arg(long)]
        submission: u64,
    },
    RespondEnrollment {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        stimulus: Address,
        #[arg(long)]
        candidate: Address,
        #[arg(long)]
        submission: u64,
        /// Accept the candidate; omitted means reject
        #[arg(long)]
        accept: bool,
    },
    Submit {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        stimulus: Address,
        #[arg(long = "type")]
        stimulus_type: u8,
        #[arg(long)]
        submission: u64,
    },
    Respond {
        #[command(flatten)]
        caller: Caller,
        #[arg(long)]
        stimulus: Address,
        #[arg(long)]
        candidate: Address,
        #[arg(long = "type")]
        stimulus_type: u8,
        #[arg(long)]
        submission: u64,
        #[arg(long)]
        accept: bool,
    },
    Status {
        #[arg(long)]
        stimulus: Address,
        #[arg(long)]
        account: Address,
    },
    /// List every participant of a stimulus with its status
    Participants {
        #[arg(long)]
        stimulus: Address,
    },
    /// List deployed ledgers and stimuli
    List,
    /// Query the event log
    Events {
        /// transfer | approval | stimulus_request | stimulus_response
        #[arg(long)]
        kind: Option<EventKind>,
        #[arg(long)]
        emitter: Option<Address>,
        #[arg(long)]
        involving: Option<Address>,
        #[arg(long)]
        from_block: Option<u64>,
        #[arg(long)]
        to_block: Option<u64>,
    },
}

impl Command {
    fn mutates(&self) -> bool {
        !matches!(
            self,
            Command::Balance { .. }
                | Command::Allowance { .. }
                | Command::Inspect { .. }
                | Command::Status { .. }
                | Command::Participants { .. }
                | Command::List
                | Command::Events { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{}: {0}", .0.kind())]
    Call(#[from] CallError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("usage: {0}")]
    Usage(String),
    #[error("output: {0}")]
    Output(#[from] serde_json::Error),
}

//==================== command execution ====================//

const OK: &str = "ok";

fn run(chain: &Chain, command: Command) -> Result<String, CliError> {
    let out = match command {
        Command::DeployLedger {
            caller,
            config,
            name,
            symbol,
            supply,
        } => {
            let config = match config {
                Some(path) => LedgerConfig::from_file(path)?,
                None => LedgerConfig {
                    name,
                    symbol,
                    initial_supply: supply,
                },
            };
            chain.deploy_ledger(&caller.caller, &config).to_string()
        }
        Command::DeployStimulus {
            caller,
            ledger,
            config,
            rewards,
        } => {
            let config = match config {
                Some(path) => StimulusConfig::from_file(path)?,
                None => StimulusConfig {
                    rewards: rewards.try_into().map_err(|r: Vec<Amount>| {
                        CliError::Usage(format!("--rewards needs 5 values, got {}", r.len()))
                    })?,
                },
            };
            chain
                .deploy_stimulus(&caller.caller, &ledger, &config)?
                .to_string()
        }
        Command::Balance { ledger, account } => chain.balance_of(&ledger, &account)?.to_string(),
        Command::Allowance {
            ledger,
            owner,
            spender,
        } => chain.allowance(&ledger, &owner, &spender)?.to_string(),
        Command::Inspect { ledger } => serde_json::to_string_pretty(&chain.ledger_snapshot(&ledger)?)?,
        Command::Approve {
            caller,
            ledger,
            spender,
            amount,
        } => chain
            .approve(&ledger, &caller.caller, &spender, amount)
            .map(|()| OK.to_string())?,
        Command::Transfer {
            caller,
            ledger,
            to,
            amount,
        } => chain
            .transfer(&ledger, &caller.caller, &to, amount)
            .map(|()| OK.to_string())?,
        Command::TransferFrom {
            caller,
            ledger,
            from,
            to,
            amount,
        } => chain
            .transfer_from(&ledger, &caller.caller, &from, &to, amount)
            .map(|()| OK.to_string())?,
        Command::IncreaseSupply {
            caller,
            ledger,
            amount,
        } => chain
            .increase_supply(&ledger, &caller.caller, amount)
            .map(|()| OK.to_string())?,
        Command::DecreaseSupply {
            caller,
            ledger,
            amount,
        } => chain
            .decrease_supply(&ledger, &caller.caller, amount)
            .map(|()| OK.to_string())?,
        Command::ChangeMastery {
            caller,
            ledger,
            new_master,
        } => chain
            .change_mastery(&ledger, &caller.caller, &new_master)
            .map(|()| OK.to_string())?,
        Command::ChangeName {
            caller,
            ledger,
            name,
        } => chain
            .change_name(&ledger, &caller.caller, &name)
            .map(|()| OK.to_string())?,
        Command::ChangeSymbol {
            caller,
            ledger,
            symbol,
        } => chain
            .change_symbol(&ledger, &caller.caller, &symbol)
            .map(|()| OK.to_string())?,
        Command::Whitelist {
            caller,
            ledger,
            old_ledger,
        } => chain
            .whitelist_for_reclamation(&ledger, &caller.caller, &old_ledger)
            .map(|()| OK.to_string())?,
        Command::Reclaim {
            caller,
            ledger,
            old_ledger,
            account,
            amount,
        } => chain
            .reclaim_balance_from(&ledger, &caller.caller, &old_ledger, &account, amount)
            .map(|()| OK.to_string())?,
        Command::Enroll {
            caller,
            stimulus,
            submission,
        } => chain
            .enroll(&stimulus, &caller.caller, submission)
            .map(|()| OK.to_string())?,
        Command::RespondEnrollment {
            caller,
            stimulus,
            candidate,
            submission,
            accept,
        } => chain
            .respond_to_enrollment(&stimulus, &caller.caller, &candidate, submission, accept)
            .map(|()| OK.to_string())?,
        Command::Submit {
            caller,
            stimulus,
            stimulus_type,
            submission,
        } => chain
            .submit(&stimulus, &caller.caller, stimulus_type, submission)
            .map(|()| OK.to_string())?,
        Command::Respond {
            caller,
            stimulus,
            candidate,
            stimulus_type,
            submission,
            accept,
        } => chain
            .respond(
                &stimulus,
                &caller.caller,
                &candidate,
                stimulus_type,
                submission,
                accept,
            )
            .map(|()| OK.to_string())?,
        Command::Status { stimulus, account } => {
            let status = chain.status(&stimulus, &account)?;
            format!("{} ({})", status, status.code())
        }
        Command::Participants { stimulus } => {
            let stimulus = chain.stimulus(&stimulus)?;
            let lines: Vec<String> = stimulus
                .participants()
                .map(|(account, status)| format!("{account} {status}"))
                .collect();
            lines.join("\n")
        }
        Command::List => {
            let mut lines = Vec::new();
            for ledger in chain.ledgers() {
                let snapshot = chain.ledger_snapshot(&ledger)?;
                lines.push(format!(
                    "ledger   {} {} supply={}",
                    ledger, snapshot.symbol, snapshot.total_supply
                ));
            }
            for stimulus in chain.stimuli() {
                let state = chain.stimulus(&stimulus)?;
                lines.push(format!(
                    "stimulus {} ledger={} pi={}",
                    stimulus,
                    state.ledger(),
                    state.principal_investigator()
                ));
            }
            lines.join("\n")
        }
        Command::Events {
            kind,
            emitter,
            involving,
            from_block,
            to_block,
        } => {
            let filter = EventFilter {
                kind,
                emitter,
                involving,
                from_block,
                to_block,
            };
            let mut lines = Vec::new();
            for record in chain.events(&filter) {
                lines.push(serde_json::to_string(&record)?);
            }
            lines.join("\n")
        }
    };
    Ok(out)
}


//==================== main ====================//

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let chain = match Chain::load(&cli.state) {
        Ok(chain) => chain,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(2);
        }
    };

    let mutates = cli.command.mutates();
    match run(&chain, cli.command) {
        Ok(out) => {
            if mutates {
                if let Err(err) = chain.save(&cli.state) {
                    eprintln!("error: {err}");
                    process::exit(2);
                }
            }
            if !out.is_empty() {
                println!("{out}");
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    }
}
