//! Operator Command Surface
//!
//! Text commands typed at the node's prompt. Parsing is separated from
//! execution so it stays trivially testable; execution returns printable
//! output and never panics on operator input.

use anyhow::Result;

use crate::membership::MembershipService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join,
    Leave,
    ListMembers,
    ListSelf,
    Suspicion(bool),
    DropRate(u8),
    Throughput,
    Help,
    Exit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let head = words.next().unwrap_or("");

        let cmd = match (head, words.next()) {
            ("join", None) => Command::Join,
            ("leave", None) => Command::Leave,
            ("list_mem", None) => Command::ListMembers,
            ("list_self", None) => Command::ListSelf,
            ("suspicion", Some("on")) => Command::Suspicion(true),
            ("suspicion", Some("off")) => Command::Suspicion(false),
            ("droprate", Some(pct)) => {
                let pct: u8 = pct
                    .parse()
                    .map_err(|_| anyhow::anyhow!("droprate takes a percentage 0-100"))?;
                Command::DropRate(pct)
            }
            ("bw", None) => Command::Throughput,
            ("help", None) => Command::Help,
            ("exit", None) => Command::Exit,
            _ => anyhow::bail!("unrecognized command {:?} (try 'help')", line.trim()),
        };

        Ok(cmd)
    }
}

pub const HELP_TEXT: &str = "commands:\n  \
    join              join the group via the introducer\n  \
    leave             leave the group and clear the member list\n  \
    list_mem          print the membership table\n  \
    list_self         print this node's id\n  \
    suspicion on|off  toggle the two-phase suspicion mechanism\n  \
    droprate <pct>    deliberately drop that percentage of gossip rounds\n  \
    bw                observed throughput of the last gossip round\n  \
    exit              terminate the node";

/// Runs one command against the service and renders the outcome.
pub async fn dispatch(service: &MembershipService, cmd: Command) -> String {
    match cmd {
        Command::Join => match service.join().await {
            Ok(id) => format!("joined as {}", id),
            Err(e) => format!("join failed: {}", e),
        },
        Command::Leave => {
            service.leave().await;
            "left the group".to_string()
        }
        Command::ListMembers => {
            let rows = service.member_rows().await;
            if rows.is_empty() {
                return "membership table is empty".to_string();
            }
            let mut out = String::new();
            for (id, heartbeat, suspect) in rows {
                out.push_str(&format!(
                    "{}  heartbeat={}{}\n",
                    id,
                    heartbeat,
                    if suspect { "  SUSPECT" } else { "" }
                ));
            }
            out.trim_end().to_string()
        }
        Command::ListSelf => service.whoami().to_string(),
        Command::Suspicion(enabled) => {
            service.set_suspicion(enabled);
            format!("suspicion {}", if enabled { "on" } else { "off" })
        }
        Command::DropRate(pct) => match service.set_drop_rate(pct) {
            Ok(()) => format!("drop rate {}%", pct),
            Err(e) => e.to_string(),
        },
        Command::Throughput => match service.last_round_throughput() {
            Some(rate) => format!("last gossip round: {:.0} bytes/sec", rate),
            None => "no gossip round completed yet".to_string(),
        },
        Command::Help => HELP_TEXT.to_string(),
        Command::Exit => "bye".to_string(),
    }
}
