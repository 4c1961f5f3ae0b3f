use std::io::Write as _;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Minimal line-mode REPL client for the admin protocol.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Proxy host (ip address).
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Admin port.
    #[arg(short, long, default_value_t = 5201)]
    port: u16,
    /// Client read buffer size.
    #[arg(long, default_value_t = 16384)]
    read_buffer_size: usize,
}

fn print_help() {
    println!("-----help-----");
    println!("info\tshow proxy information");
    println!("addserver <addr> [weight] [probe]\tadd server to proxy");
    println!("deleteserver <addr>\tdelete server from proxy");
    println!("getserver <addr>\tget specified server information");
    println!("exists <addr>\tquery specified server exists or not");
    println!("setweight <addr> <weight>\tset the weight of specified server");
    println!("save\tsave proxy current server list to disk");
    println!("shutdown\tshutdown server gracefully");
    println!("-h / -help\tdisplay help");
    println!("-q / -quit\texit client");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let conn_addr = format!("{}:{}", args.host, args.port);

    let mut conn = TcpStream::connect(&conn_addr).await?;
    let mut read_buf = vec![0u8; args.read_buffer_size];
    let mut stdin = BufReader::new(tokio::io::stdin());

    loop {
        print!("{}> ", conn_addr);
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.read_line(&mut line).await? == 0 {
            break;
        }
        let input = line.trim().to_lowercase();

        if input == "-q" || input == "-quit" {
            println!("Bye, have a good day!");
            break;
        }
        if input == "-h" || input == "-help" {
            print_help();
            continue;
        }
        if input.is_empty() {
            continue;
        }

        if let Err(err) = conn.write_all(input.as_bytes()).await {
            println!("write to proxy failed: {}", err);
            continue;
        }
        let n = match conn.read(&mut read_buf).await {
            Ok(n) => n,
            Err(err) => {
                println!("receive from proxy failed: {}", err);
                continue;
            }
        };
        println!("{}", String::from_utf8_lossy(&read_buf[..n]));
    }
    Ok(())
}
