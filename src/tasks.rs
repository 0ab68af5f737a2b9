/*!
Boucles périodiques et superviseur.

Quatre tâches de priorités inégales :
- lecteur série (E/S bloquante, interrompue par le timeout de 2,5 s)
- boucle attitude à 500 Hz, qui ne doit jamais être affamée par le
  travail du parseur
- boucle environnement à 0,2 Hz
- superviseur à 0,25 Hz, qui (re)connecte le matériel

Les sorties de boucle sont pilotées par les drapeaux : quand une boucle
voit son drapeau requis à faux sur un tick, elle libère ses ressources
et rend la main. Le superviseur récupère et relance si configuré.
*/

use crate::clock::ClockSource;
use crate::device::{self, DeviceError};
use crate::gdl90::{self, Channel, Transport};
use crate::parser::SentenceParser;
use crate::sensors::{AhrsFilter, AhrsHardware, Barometer, Imu};
use crate::situation::{Settings, Situation, Status};
use serialport::SerialPort;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 500 Hz : cadence de la boucle attitude
const ATTITUDE_PERIOD: Duration = Duration::from_millis(2);

/// 0,2 Hz : le baromètre est lent, inutile de le presser
const ENVIRONMENT_PERIOD: Duration = Duration::from_secs(5);

/// 0,25 Hz : cadence de reconnexion du superviseur
const SUPERVISOR_PERIOD: Duration = Duration::from_secs(4);

/// Conversion mètres vers pieds pour l'altitude pression
const FEET_PER_METER: f64 = 1.0 / 0.3048;

/// Superviseur : possède les coutures vers le matériel et relance les
/// boucles quand un sous-système activé n'est pas connecté
pub struct Supervisor {
    situation: Arc<Situation>,
    parser: Arc<SentenceParser>,
    clock: Arc<dyn ClockSource>,
    settings: Arc<Settings>,
    status: Arc<Status>,
    transport: Arc<dyn Transport>,
    hardware: Arc<dyn AhrsHardware>,
    ahrs: Arc<dyn AhrsFilter>,
    gps_devices: Vec<String>,
    i2c_bus: u8,
    running: Arc<AtomicBool>,
    /// Le lecteur série précédent a rendu la main : on peut en relancer
    /// un sans risquer deux lecteurs sur le même port
    ready_to_init_gps: Arc<AtomicBool>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        situation: Arc<Situation>,
        parser: Arc<SentenceParser>,
        clock: Arc<dyn ClockSource>,
        settings: Arc<Settings>,
        status: Arc<Status>,
        transport: Arc<dyn Transport>,
        hardware: Arc<dyn AhrsHardware>,
        ahrs: Arc<dyn AhrsFilter>,
        gps_devices: Vec<String>,
        i2c_bus: u8,
    ) -> Self {
        Supervisor {
            situation,
            parser,
            clock,
            settings,
            status,
            transport,
            hardware,
            ahrs,
            gps_devices,
            i2c_bus,
            running: Arc::new(AtomicBool::new(true)),
            ready_to_init_gps: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Poignée d'arrêt à conserver avant de démarrer
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Démarre la boucle de supervision
    pub fn start(self) -> JoinHandle<()> {
        info!("Starting supervisor loop");
        thread::spawn(move || {
            while self.running.load(Ordering::Relaxed) {
                thread::sleep(SUPERVISOR_PERIOD);
                self.tick();
            }
            info!("Supervisor loop terminated");
        })
    }

    fn tick(&self) {
        // GPS activé mais pas connecté ?
        if self.settings.gps_enabled.load(Ordering::Relaxed)
            && !self.status.gps_connected.load(Ordering::Relaxed)
            && self.ready_to_init_gps.load(Ordering::Relaxed)
        {
            match device::open_gps_serial(&self.gps_devices, self.settings.debug()) {
                Ok(port) => {
                    self.status.gps_connected.store(true, Ordering::Relaxed);
                    self.ready_to_init_gps.store(false, Ordering::Relaxed);
                    self.spawn_serial_reader(port);
                }
                Err(DeviceError::NoDevice) => {
                    // Silencieux : ressondé dans 4 s, inutile de remplir
                    // le journal sur un récepteur simplement absent
                    debug!("No suitable GPS device found");
                }
                Err(e) => warn!("serial port err: {:#}", e),
            }
        }

        // Capteurs AHRS activés mais pas connectés ?
        if self.settings.ahrs_enabled.load(Ordering::Relaxed)
            && !self.status.ahrs_connected.load(Ordering::Relaxed)
        {
            match self.hardware.open(self.i2c_bus) {
                Ok(devices) => {
                    self.status.ahrs_connected.store(true, Ordering::Relaxed);
                    self.spawn_attitude_loop(devices.imu);
                    self.spawn_environment_loop(devices.barometer);
                }
                Err(e) => {
                    error!("AHRS init: {:#}; disabling AHRS sensors.", e);
                    self.status.ahrs_connected.store(false, Ordering::Relaxed);
                }
            }
        }
    }

    fn spawn_serial_reader(&self, port: Box<dyn SerialPort>) {
        let parser = Arc::clone(&self.parser);
        let settings = Arc::clone(&self.settings);
        let status = Arc::clone(&self.status);
        let ready = Arc::clone(&self.ready_to_init_gps);
        thread::spawn(move || {
            gps_serial_reader(port, parser, settings, status, ready);
        });
    }

    fn spawn_attitude_loop(&self, imu: Box<dyn Imu>) {
        let situation = Arc::clone(&self.situation);
        let clock = Arc::clone(&self.clock);
        let settings = Arc::clone(&self.settings);
        let status = Arc::clone(&self.status);
        let transport = Arc::clone(&self.transport);
        let ahrs = Arc::clone(&self.ahrs);
        thread::spawn(move || {
            attitude_loop(
                imu,
                ahrs,
                situation,
                clock,
                transport,
                settings,
                status,
                ATTITUDE_PERIOD,
            );
        });
    }

    fn spawn_environment_loop(&self, barometer: Box<dyn Barometer>) {
        let situation = Arc::clone(&self.situation);
        let clock = Arc::clone(&self.clock);
        let settings = Arc::clone(&self.settings);
        let status = Arc::clone(&self.status);
        thread::spawn(move || {
            environment_loop(
                barometer,
                situation,
                clock,
                settings,
                status,
                ENVIRONMENT_PERIOD,
            );
        });
    }
}

/// Lecteur série : une ligne, une trame, dans l'ordre d'arrivée
///
/// Sort sur erreur de lecture (timeout de 2,5 s compris : un récepteur
/// à 5 Hz silencieux aussi longtemps est débranché) ou quand le GPS est
/// désactivé. En sortant, signale la déconnexion et autorise le
/// superviseur à relancer.
fn gps_serial_reader(
    port: Box<dyn SerialPort>,
    parser: Arc<SentenceParser>,
    settings: Arc<Settings>,
    status: Arc<Status>,
    ready_to_init_gps: Arc<AtomicBool>,
) {
    let mut reader = BufReader::new(port);
    let mut line = String::new();
    let mut iterations: u64 = 0;

    while status.gps_connected.load(Ordering::Relaxed)
        && settings.gps_enabled.load(Ordering::Relaxed)
    {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break, // fin de flux
            Ok(_) => {
                iterations += 1;
                if settings.debug() && iterations % 100 == 0 {
                    debug!("gps serial reader loop iteration i={}", iterations);
                }
                let sentence = line.trim();
                if sentence.is_empty() {
                    continue;
                }
                if !parser.process_line(sentence) && settings.debug() {
                    debug!("sentence rejected -- {}", sentence);
                }
            }
            Err(e) => {
                warn!("GPS serial read: {}", e);
                break;
            }
        }
    }

    if settings.debug() {
        debug!("Exiting gps serial reader after i={} loops", iterations);
    }
    status.gps_connected.store(false, Ordering::Relaxed);
    ready_to_init_gps.store(true, Ordering::Relaxed);
    // Le port se ferme en sortant de portée
}

/// Boucle attitude à cadence fixe
///
/// Échéances absolues : un tick en retard ne décale pas les suivants.
/// L'émission se fait hors du verrou attitude, l'envoi réseau étant un
/// point de suspension.
#[allow(clippy::too_many_arguments)]
fn attitude_loop(
    mut imu: Box<dyn Imu>,
    ahrs: Arc<dyn AhrsFilter>,
    situation: Arc<Situation>,
    clock: Arc<dyn ClockSource>,
    transport: Arc<dyn Transport>,
    settings: Arc<Settings>,
    status: Arc<Status>,
    period: Duration,
) {
    let mut next_tick = Instant::now() + period;

    while status.ahrs_connected.load(Ordering::Relaxed)
        && settings.ahrs_enabled.load(Ordering::Relaxed)
    {
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }
        next_tick += period;

        let sample = match imu.read_raw() {
            Ok(sample) => sample,
            Err(e) => {
                error!("attitude loop IMU read: {:#}", e);
                continue;
            }
        };
        ahrs.update(&sample);
        let (pitch, roll) = ahrs.attitude_xy();

        situation.with_attitude(|attitude| {
            attitude.pitch = pitch;
            attitude.roll = roll;
            attitude.last_attitude_time = clock.monotonic();
        });

        let snapshot = situation.attitude_snapshot();
        let frame = gdl90::make_ahrs_gdl90_frame(&snapshot);
        let prepared = transport.prepare_message(&frame);
        transport.send_msg(prepared, Channel::AhrsGdl90, false);

        if settings.ahrs_ffsim.load(Ordering::Relaxed) {
            transport.send_msg(gdl90::make_ff_sim_report(&snapshot), Channel::AhrsFfSim, false);
        }
    }
    status.ahrs_connected.store(false, Ordering::Relaxed);
}

/// Boucle environnement : température et altitude pression
///
/// Une erreur de lecture I²C marque le sous-système AHRS déconnecté, ce
/// qui termine aussi la boucle attitude ; le superviseur réinitialisera.
fn environment_loop(
    mut barometer: Box<dyn Barometer>,
    situation: Arc<Situation>,
    clock: Arc<dyn ClockSource>,
    settings: Arc<Settings>,
    status: Arc<Status>,
    period: Duration,
) {
    while status.ahrs_connected.load(Ordering::Relaxed)
        && settings.ahrs_enabled.load(Ordering::Relaxed)
    {
        thread::sleep(period);

        let temperature = match barometer.read_temperature() {
            Ok(t) => t,
            Err(e) => {
                error!("barometer read: {:#}", e);
                status.ahrs_connected.store(false, Ordering::Relaxed);
                break;
            }
        };
        let altitude_m = match barometer.read_pressure_altitude() {
            Ok(a) => a,
            Err(e) => {
                error!("barometer read: {:#}", e);
                status.ahrs_connected.store(false, Ordering::Relaxed);
                break;
            }
        };

        situation.with_attitude(|attitude| {
            attitude.temperature = temperature;
            attitude.pressure_alt = altitude_m * FEET_PER_METER;
            attitude.last_temp_press_time = clock.monotonic();
        });
    }
    status.ahrs_connected.store(false, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use crate::gdl90::RecordingTransport;
    use crate::sensors::fakes::{FixedAhrsFilter, ScriptedBarometer, ScriptedImu};
    use crate::sensors::ImuSample;

    fn test_flags(ahrs_connected: bool) -> (Arc<Settings>, Arc<Status>) {
        let settings = Arc::new(Settings::new(true, true, false, false));
        let status = Arc::new(Status::new());
        status
            .ahrs_connected
            .store(ahrs_connected, Ordering::Relaxed);
        (settings, status)
    }

    #[test]
    fn test_attitude_loop_updates_and_emits() {
        let (settings, status) = test_flags(true);
        let situation = Arc::new(Situation::new());
        let clock = Arc::new(SimulatedClock::new());
        let transport = Arc::new(RecordingTransport::new());
        let ahrs = Arc::new(FixedAhrsFilter {
            pitch: 4.5,
            roll: -1.5,
            updates: std::sync::Mutex::new(0),
        });

        let handle = {
            let situation = Arc::clone(&situation);
            let clock = clock.clone() as Arc<dyn ClockSource>;
            let transport = transport.clone() as Arc<dyn Transport>;
            let settings = Arc::clone(&settings);
            let status = Arc::clone(&status);
            let ahrs = ahrs.clone() as Arc<dyn AhrsFilter>;
            thread::spawn(move || {
                attitude_loop(
                    Box::new(ScriptedImu {
                        sample: ImuSample::default(),
                    }),
                    ahrs,
                    situation,
                    clock,
                    transport,
                    settings,
                    status,
                    Duration::from_millis(1),
                )
            })
        };

        thread::sleep(Duration::from_millis(50));
        settings.ahrs_enabled.store(false, Ordering::Relaxed);
        handle.join().unwrap();

        // La boucle a rendu la main en signalant la déconnexion
        assert!(!status.ahrs_connected.load(Ordering::Relaxed));

        let attitude = situation.attitude_snapshot();
        assert_eq!(attitude.pitch, 4.5);
        assert_eq!(attitude.roll, -1.5);
        assert!(attitude.last_attitude_time > Duration::ZERO);

        let sent = transport.sent.lock().unwrap();
        assert!(!sent.is_empty());
        let (frame, channel) = &sent[0];
        assert_eq!(*channel, Channel::AhrsGdl90);
        assert_eq!(frame.len(), 16);
        assert_eq!(&frame[..4], &[0x4C, 0x45, 0x01, 0x00]);
        assert!(*ahrs.updates.lock().unwrap() > 0);
    }

    #[test]
    fn test_environment_loop_stores_then_dies_on_error() {
        let (settings, status) = test_flags(true);
        let situation = Arc::new(Situation::new());
        let clock = Arc::new(SimulatedClock::new());

        let barometer = ScriptedBarometer {
            temperature: 21.5,
            altitude_m: 304.8,
            fail_after: Some(2),
            reads: 0,
        };

        let handle = {
            let situation = Arc::clone(&situation);
            let clock = clock.clone() as Arc<dyn ClockSource>;
            let settings = Arc::clone(&settings);
            let status = Arc::clone(&status);
            thread::spawn(move || {
                environment_loop(
                    Box::new(barometer),
                    situation,
                    clock,
                    settings,
                    status,
                    Duration::from_millis(1),
                )
            })
        };

        // La panne au troisième tour termine la boucle d'elle-même
        handle.join().unwrap();
        assert!(!status.ahrs_connected.load(Ordering::Relaxed));

        let attitude = situation.attitude_snapshot();
        assert_eq!(attitude.temperature, 21.5);
        // 304,8 m = 1000 pieds
        assert!((attitude.pressure_alt - 1000.0).abs() < 0.01);
        assert!(attitude.last_temp_press_time > Duration::ZERO);
    }

    #[test]
    fn test_loops_exit_when_disabled() {
        let (settings, status) = test_flags(false);
        let situation = Arc::new(Situation::new());
        let clock = Arc::new(SimulatedClock::new());

        // Drapeau déjà à faux : la boucle doit rendre la main immédiatement
        let handle = {
            let situation = Arc::clone(&situation);
            let clock = clock.clone() as Arc<dyn ClockSource>;
            let settings = Arc::clone(&settings);
            let status = Arc::clone(&status);
            thread::spawn(move || {
                environment_loop(
                    Box::new(ScriptedBarometer {
                        temperature: 0.0,
                        altitude_m: 0.0,
                        fail_after: None,
                        reads: 0,
                    }),
                    situation,
                    clock,
                    settings,
                    status,
                    Duration::from_millis(1),
                )
            })
        };
        handle.join().unwrap();
        assert_eq!(situation.attitude_snapshot().last_temp_press_time, Duration::ZERO);
    }
}
