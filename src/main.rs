use anyhow::Result;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use open_lavalink::{Config, LavalinkClient};

const REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_lavalink=debug".parse()?)
                .add_directive("tungstenite=info".parse()?)
                .add_directive("reqwest=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Lavalink v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    let client = LavalinkClient::new(config.client_settings())?;

    // Registrar nodos; un nodo caído no detiene el arranque
    for node in &config.nodes {
        let entry = match node.entry() {
            Ok(entry) => entry,
            Err(e) => {
                error!("❌ Nodo inválido {}: {}", node.host, e);
                continue;
            }
        };

        match client.add_node(entry).await {
            Ok(node) => info!("✅ Nodo {} registrado", node.key()),
            Err(e) => error!("❌ Error al conectar con {}: {}", node.host, e),
        }
    }

    if client.nodes().is_empty() {
        warn!("⚠️ No hay nodos registrados");
    }

    let mut ticker = tokio::time::interval(REPORT_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => report(&client),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Error al registrar Ctrl+C: {}", e);
                }
                break;
            }
        }
    }

    info!("⚠️ Señal de shutdown recibida, cerrando...");
    client.shutdown();
    Ok(())
}

fn report(client: &LavalinkClient) {
    for node in client.nodes().nodes() {
        let penalties = node.load_balancer();
        info!(
            "📊 {} available={} total={} (players {}, cpu {}, deficit {}, null {})",
            node.key(),
            node.is_available(),
            penalties.total(),
            penalties.player_penalty,
            penalties.cpu_penalty,
            penalties.deficit_frame_penalty,
            penalties.null_frame_penalty,
        );
    }

    match client.best_node() {
        Ok(node) => info!("🏆 Mejor nodo: {} ({} players activos)", node.key(), client.players().len()),
        Err(e) => warn!("Sin nodo disponible: {}", e),
    }

    client.track_cache().cleanup_old_entries();
    debug!(
        "Cache: {} tracks, hit rate {:.1}%",
        client.track_cache().len(),
        client.track_cache().metrics().hit_rate() * 100.0
    );
}
