use std::{error::Error, io, net::SocketAddr};

use clap::Parser;
use wsp::{
    Command, SearchClient,
    cli::{PromptError, prompt},
    config::DEFAULT_CATALOG,
    props,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address
    address: SocketAddr,
    /// Scope of queries, e.g. file://host/share
    #[arg(short, long, default_value = "file://localhost/docs")]
    scope: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let stream = std::net::TcpStream::connect(cli.address)?;
    let mut client = SearchClient::new(stream, &cli.scope)?;

    let header = client
        .columns()
        .iter()
        .map(|c| props::name_for_id(c).unwrap_or("?"))
        .collect::<Vec<_>>()
        .join("\t");

    loop {
        let cmd = match prompt(io::stdin().lock(), io::stdout().lock()) {
            Ok(c) => c,
            Err(PromptError::Io(e)) => return Err(e.into()),
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let res = match cmd {
            Command::Exit => break,
            Command::Connect(catalog) => client
                .connect(catalog.as_deref().unwrap_or(DEFAULT_CATALOG))
                .map(|version| println!("connected, server version {version:#x}")),
            Command::Scope(scope) => {
                client.set_scope(&scope);
                Ok(())
            }
            Command::Query(phrase) => client.query(&phrase),
            Command::Fetch(rows) => client.fetch(rows).map(|fetched| {
                println!("{header}");
                for row in &fetched.rows {
                    let line = row.iter().map(|v| v.to_string()).collect::<Vec<_>>();
                    println!("{}", line.join("\t"));
                }
                if fetched.end {
                    println!("(end of results)");
                }
            }),
            Command::Status => client.status().map(|s| {
                println!(
                    "status {}, {} rows, {} results, max rank {}",
                    s.status, s.row_count, s.results_found, s.max_rank
                )
            }),
        };
        if let Err(e) = res {
            eprintln!("error: {e}");
        }
    }

    client.disconnect()?;
    Ok(())
}
