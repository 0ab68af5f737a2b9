mod clock;
mod config;
mod device;
mod gdl90;
mod nmea;
mod parser;
mod satellites;
mod sensors;
mod situation;
mod tasks;
mod timesync;

use anyhow::{Context, Result};
use clock::{ClockSource, SystemClock};
use config::Config;
use gdl90::LogTransport;
use parser::{SentenceParser, TracingSituationLog};
use satellites::Constellation;
use sensors::NoAhrsHardware;
use situation::{Settings, Situation, Status};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tasks::Supervisor;
use timesync::OsDateSetter;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    // Initialiser les logs
    init_logging()?;

    info!("Horizon situation receiver v{}", env!("CARGO_PKG_VERSION"));
    info!("GPS/GNSS + AHRS front-end for cockpit displays");

    // Charger la configuration
    let config_path = get_config_path();
    let config = load_or_create_config(&config_path)?;

    // Afficher la configuration
    info!("Configuration:");
    info!("  GPS enabled: {}", config.gps.enabled);
    info!("  GPS devices: {:?}", config.gps_devices());
    info!("  AHRS enabled: {}", config.ahrs.enabled);
    info!("  I2C bus: {}", config.ahrs.i2c_bus);

    // État partagé du processus
    let clock: Arc<dyn ClockSource> = Arc::new(SystemClock::new());
    let situation = Arc::new(Situation::new());
    let constellation = Arc::new(Constellation::new());
    let settings = Arc::new(Settings::new(
        config.gps.enabled,
        config.ahrs.enabled,
        config.logging.debug,
        config.ahrs.ffsim,
    ));
    let status = Arc::new(Status::new());

    // Le parseur est l'unique écrivain de l'enregistrement GPS
    let parser = Arc::new(SentenceParser::new(
        Arc::clone(&situation),
        Arc::clone(&constellation),
        Arc::clone(&clock),
        Arc::new(OsDateSetter),
        Arc::new(TracingSituationLog),
        Arc::clone(&settings),
    ));

    // Superviseur : reconnexion GPS et AHRS toutes les 4 secondes
    let supervisor = Supervisor::new(
        Arc::clone(&situation),
        Arc::clone(&parser),
        Arc::clone(&clock),
        Arc::clone(&settings),
        Arc::clone(&status),
        Arc::new(LogTransport),
        Arc::new(NoAhrsHardware),
        Arc::new(NullAhrsFilter),
        config.gps_devices(),
        config.ahrs.i2c_bus,
    );
    let supervisor_running = supervisor.stop_handle();
    let supervisor_handle = supervisor.start();

    // Gérer Ctrl+C avec confirmation à double pression
    let shutdown_requested = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let ctrl_c_count = Arc::new(std::sync::atomic::AtomicU8::new(0));

    let shutdown_clone = Arc::clone(&shutdown_requested);
    let count_clone = Arc::clone(&ctrl_c_count);
    let settings_clone = Arc::clone(&settings);
    let running_clone = Arc::clone(&supervisor_running);

    ctrlc::set_handler(move || {
        let count = count_clone.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            // Première pression
            warn!("Ctrl+C détecté. Appuyez à nouveau dans les 5 secondes pour arrêter le démon.");

            // Thread qui désamorce après 5 secondes
            let count_disarm = Arc::clone(&count_clone);
            std::thread::spawn(move || {
                std::thread::sleep(std::time::Duration::from_secs(5));
                let current = count_disarm.load(Ordering::SeqCst);
                if current == 1 {
                    // Pas de deuxième pression, désamorcer
                    count_disarm.store(0, Ordering::SeqCst);
                    info!("Arrêt annulé. Le démon continue.");
                }
            });
        } else {
            // Deuxième pression (ou plus)
            warn!("Arrêt confirmé. Fermeture du démon...");
            // Les boucles sortent d'elles-mêmes sur leurs drapeaux
            settings_clone.gps_enabled.store(false, Ordering::Relaxed);
            settings_clone.ahrs_enabled.store(false, Ordering::Relaxed);
            running_clone.store(false, Ordering::Relaxed);
            shutdown_clone.store(true, Ordering::SeqCst);
            // Forcer la sortie si une boucle ne répond pas
            std::thread::spawn(|| {
                std::thread::sleep(std::time::Duration::from_secs(5));
                error!("Arrêt forcé (timeout)");
                std::process::exit(0);
            });
        }
    })
    .context("Failed to set Ctrl+C handler")?;

    info!("Press Ctrl+C twice (within 5 seconds) to stop");

    // Battement de cœur : état des sous-systèmes toutes les 60 secondes
    let mut ticks: u64 = 0;
    while !shutdown_requested.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_secs(1));
        ticks += 1;
        if ticks % 60 == 0 {
            log_health(&situation, &status, &constellation, &*clock);
        }
    }

    supervisor_handle
        .join()
        .map_err(|_| anyhow::anyhow!("supervisor thread panicked"))?;
    info!("Horizon stopped");
    Ok(())
}

/// Fusion d'attitude nulle : en l'absence de pilote AHRS branché, le
/// superviseur n'atteint jamais la boucle attitude, mais la couture
/// doit exister
struct NullAhrsFilter;

impl sensors::AhrsFilter for NullAhrsFilter {
    fn update(&self, _sample: &sensors::ImuSample) {}

    fn attitude_xy(&self) -> (f64, f64) {
        (0.0, 0.0)
    }
}

/// Consigne l'état de santé des sous-systèmes
fn log_health(
    situation: &Situation,
    status: &Status,
    constellation: &Constellation,
    clock: &dyn ClockSource,
) {
    let gps_connected = status.gps_connected.load(Ordering::Relaxed);
    let gps_valid = situation.is_gps_valid(clock, gps_connected);
    let gps = situation.gps_snapshot();
    let attitude = situation.attitude_snapshot();

    info!(
        "GPS: connected={} valid={} track_valid={} clock_valid={} sats={} ({} tracked, {} seen, {} in map) NACp={}",
        situation.is_gps_connected(clock),
        gps_valid,
        situation.is_gps_ground_track_valid(clock),
        situation.is_gps_clock_valid(clock),
        gps.satellites,
        gps.satellites_tracked,
        gps.satellites_seen,
        constellation.len(),
        gps.nacp,
    );
    info!(
        "AHRS: connected={} valid={} temp_press_valid={} pitch={:.1} roll={:.1} yaw={:.1} hdg={:.1} temp={:.1}C press_alt={:.0}ft",
        status.ahrs_connected.load(Ordering::Relaxed),
        situation.is_ahrs_valid(clock),
        situation.is_temp_press_valid(clock),
        attitude.pitch,
        attitude.roll,
        attitude.yaw,
        attitude.gyro_heading,
        attitude.temperature,
        attitude.pressure_alt,
    );
    debug!("last NMEA: {}", gps.last_valid_nmea_message);
}

/// Initialise le système de logging
fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Failed to create log filter")?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Obtient le chemin du fichier de configuration
fn get_config_path() -> PathBuf {
    // Vérifier les arguments de ligne de commande
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        return PathBuf::from(&args[1]);
    }

    // Sinon, utiliser le chemin par défaut
    #[cfg(target_os = "linux")]
    return PathBuf::from("/etc/horizon/config.toml");

    #[cfg(not(target_os = "linux"))]
    return PathBuf::from("config.toml");
}

/// Charge la configuration ou crée un fichier exemple
fn load_or_create_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        info!("Loading configuration from {}", path.display());
        Config::from_file(path)
    } else {
        warn!("Configuration file not found: {}", path.display());
        warn!("Creating example configuration...");

        // Créer le répertoire parent si nécessaire
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create config directory")?;
            }
        }

        // Créer une config exemple
        Config::create_example_config(path).context("Failed to create example config")?;

        info!("Example configuration created at {}", path.display());

        // Charger la config créée
        Config::from_file(path)
    }
}
