use gossip_membership::command::{self, Command};
use gossip_membership::membership::{MembershipService, ProtocolConfig};
use gossip_membership::transport::{AddressBook, UdpTransport};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

const DEFAULT_CLUSTER_SIZE: usize = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut machine_index: Option<usize> = None;
    let mut peers: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--index" if i + 1 < args.len() => {
                machine_index = Some(args[i + 1].parse()?);
                i += 2;
            }
            "--peers" if i + 1 < args.len() => {
                peers = Some(args[i + 1].clone());
                i += 2;
            }
            other => {
                eprintln!("Usage: {} --index <n> [--peers <host:port,host:port,...>]", args[0]);
                eprintln!("Example: {} --index 1", args[0]);
                eprintln!("Example: {} --index 2 --peers 10.0.0.1:49153,10.0.0.2:49153", args[0]);
                anyhow::bail!("unrecognized argument {:?}", other);
            }
        }
    }

    let machine_index = machine_index.expect("--index is required");

    let book = match peers {
        Some(list) => AddressBook::parse(&list)?,
        None => AddressBook::local_cluster(DEFAULT_CLUSTER_SIZE),
    };

    tracing::info!(
        "starting machine #{} of a {}-machine address book",
        machine_index,
        book.len()
    );

    let service = MembershipService::new(
        book,
        machine_index,
        Arc::new(UdpTransport),
        ProtocolConfig::default(),
    )?;
    service.clone().start().await?;
    tracing::info!("node id: {} (inactive until 'join')", service.whoami());

    // Operator prompt. The protocol loops keep running while this blocks on
    // stdin.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match Command::parse(&line) {
            Ok(Command::Exit) => break,
            Ok(cmd) => {
                let output = command::dispatch(&service, cmd).await;
                stdout.write_all(output.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
            }
            Err(e) => {
                stdout.write_all(format!("{}\n", e).as_bytes()).await?;
            }
        }
    }

    tracing::info!("terminating");
    Ok(())
}
