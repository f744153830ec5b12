use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Client for the tunnel proxy and its echo listeners", long_about = None)]
struct Cli {
    /// Base URL of the plain HTTP echo listener.
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Address of the CONNECT listener.
    #[arg(short, long, default_value = "127.0.0.1:3128")]
    proxy: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the mutual-TLS certificate (PEM)
    Cert,
    /// Print the mutual-TLS private key (PEM)
    Key,
    /// Send a request to the echo handler and print what came back
    Echo {
        #[arg(default_value = "/")]
        path: String,
        /// Request body; switches the method to POST.
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Open a CONNECT tunnel and report the handshake status line
    Connect {
        /// Target authority, e.g. example.com:443
        target: String,
        /// Bytes to send through the tunnel once it is established.
        #[arg(short, long)]
        send: Option<String>,
        /// Seconds to wait for tunnelled data.
        #[arg(long, default_value_t = 5)]
        wait_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Cert => {
            let res = client.get(format!("{}/cert", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Key => {
            let res = client.get(format!("{}/key", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Echo { path, data } => {
            let url = format!("{}{}", cli.url, path);
            let req = match data {
                Some(body) => client.post(url).body(body),
                None => client.get(url),
            };
            print_response(req.send().await?).await?;
        }
        Commands::Connect { target, send, wait_secs } => {
            connect(&cli.proxy, &target, send, Duration::from_secs(wait_secs)).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        eprintln!("{}", text);
        return Ok(());
    }

    // Echo bodies start with a JSON object; pretty-print it when present.
    let mut stream = serde_json::Deserializer::from_str(&text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(json)) => {
            println!("{}", serde_json::to_string_pretty(&json)?);
            let rest = &text[stream.byte_offset()..];
            if !rest.is_empty() {
                println!("{}", rest);
            }
        }
        _ => println!("{}", text),
    }
    Ok(())
}

async fn connect(
    proxy: &str,
    target: &str,
    send: Option<String>,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = TcpStream::connect(proxy).await?;
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() > 16 * 1024 {
            return Err("response head too large".into());
        }
        if stream.read(&mut byte).await? == 0 {
            break;
        }
        head.push(byte[0]);
    }
    let head = String::from_utf8_lossy(&head);
    let status_line = head.lines().next().unwrap_or_default();
    println!("{}", status_line);
    if !status_line.starts_with("HTTP/1.1 200") {
        let mut body = String::new();
        stream.read_to_string(&mut body).await?;
        eprint!("{}", body);
        return Ok(());
    }

    if let Some(payload) = send {
        stream.write_all(payload.as_bytes()).await?;
        let mut received = Vec::new();
        let _ = tokio::time::timeout(wait, stream.read_to_end(&mut received)).await;
        println!("{}", String::from_utf8_lossy(&received));
    }
    Ok(())
}
