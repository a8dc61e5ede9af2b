//! Minimal HTTP exposition of the sensor cache.
//!
//! One connection is served at a time and the request is never inspected;
//! whatever the client sent, it receives the current snapshot rendered as
//! an auto-refreshing HTML page.

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::cache::{SensorCache, Snapshot};

const RECV_BUF: usize = 1024;

/// Bind the listening socket and serve snapshots forever.
pub async fn serve(port: u16, cache: SensorCache) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("HTTP server listening on port {}", port);
    accept_loop(listener, cache).await
}

async fn accept_loop(listener: TcpListener, cache: SensorCache) -> std::io::Result<()> {
    loop {
        let (mut stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                // Accept errors are transient; keep serving
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        if let Err(e) = handle_client(&mut stream, &cache).await {
            debug!("Client connection error: {}", e);
        }
    }
}

async fn handle_client(stream: &mut TcpStream, cache: &SensorCache) -> std::io::Result<()> {
    // Consume whatever was sent; request content is irrelevant
    let mut buf = [0u8; RECV_BUF];
    let _ = stream.read(&mut buf).await;

    let response = render_response(&cache.snapshot());
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn render_field(value: Option<f32>, unit: &str, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*} {}", decimals, v, unit),
        None => "N/A".to_string(),
    }
}

fn render_page(snapshot: &Snapshot) -> String {
    format!(
        concat!(
            "<!DOCTYPE html>",
            "<html>",
            "<head>",
            "<title>Sensor Values</title>",
            "<meta http-equiv=\"refresh\" content=\"5\">",
            "</head>",
            "<body>",
            "<h1>Sensor Values</h1>",
            "<p>Temperature: {}</p>",
            "<p>Pressure: {}</p>",
            "<p>Humidity: {}</p>",
            "</body>",
            "</html>",
        ),
        render_field(snapshot.temperature, "°C", 2),
        render_field(snapshot.pressure, "hPa", 1),
        render_field(snapshot.humidity, "%RH", 2),
    )
}

fn render_response(snapshot: &Snapshot) -> String {
    let body = render_page(snapshot);
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )
}
