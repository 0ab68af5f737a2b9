/*!
Coutures vers les capteurs inertiels et barométriques.

Les pilotes matériels (IMU 9 axes, baromètre) et la fusion d'attitude
sont des collaborateurs opaques : le démon ne consomme que des scalaires.
Les traits ci-dessous forment la frontière ; les tests y branchent des
faux scriptés, le binaire y branche les pilotes réels quand ils existent.
*/

use anyhow::Result;

/// Échantillon brut 9 axes de la centrale inertielle
#[derive(Debug, Clone, Copy, Default)]
pub struct ImuSample {
    pub gx: f64,
    pub gy: f64,
    pub gz: f64,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub mx: f64,
    pub my: f64,
    pub mz: f64,
}

/// Fusion d'attitude externe (collaborateur, mathématiques hors périmètre)
pub trait AhrsFilter: Send + Sync {
    /// Intègre un échantillon gyro/accéléro/magnéto
    fn update(&self, sample: &ImuSample);

    /// Attitude courante : (tangage, roulis) en degrés
    fn attitude_xy(&self) -> (f64, f64);
}

/// Centrale inertielle : fournisseur d'échantillons bruts
pub trait Imu: Send {
    fn read_raw(&mut self) -> Result<ImuSample>;
}

/// Baromètre : température (°C) et altitude pression (mètres)
pub trait Barometer: Send {
    fn read_temperature(&mut self) -> Result<f64>;
    fn read_pressure_altitude(&mut self) -> Result<f64>;
}

/// Les deux périphériques I²C une fois ouverts
pub struct AhrsDevices {
    pub imu: Box<dyn Imu>,
    pub barometer: Box<dyn Barometer>,
}

/// Fabrique des périphériques AHRS
///
/// L'implémentation doit ouvrir dans l'ordre bus I²C, baromètre, puis
/// IMU, et court-circuiter à la première erreur en libérant ce qui a
/// déjà été ouvert (le drop des handles s'en charge côté Rust).
pub trait AhrsHardware: Send + Sync {
    fn open(&self, i2c_bus: u8) -> Result<AhrsDevices>;
}

/// Absence de pilote AHRS compilé : l'ouverture échoue toujours et le
/// superviseur retentera au prochain tour
pub struct NoAhrsHardware;

impl AhrsHardware for NoAhrsHardware {
    fn open(&self, _i2c_bus: u8) -> Result<AhrsDevices> {
        anyhow::bail!("no AHRS hardware driver available")
    }
}

#[cfg(test)]
pub mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// IMU scriptée : rejoue toujours le même échantillon
    pub struct ScriptedImu {
        pub sample: ImuSample,
    }

    impl Imu for ScriptedImu {
        fn read_raw(&mut self) -> Result<ImuSample> {
            Ok(self.sample)
        }
    }

    /// Baromètre scripté : valeurs fixes, ou panne après N lectures
    pub struct ScriptedBarometer {
        pub temperature: f64,
        pub altitude_m: f64,
        pub fail_after: Option<u32>,
        pub reads: u32,
    }

    impl Barometer for ScriptedBarometer {
        fn read_temperature(&mut self) -> Result<f64> {
            self.reads += 1;
            if let Some(n) = self.fail_after {
                if self.reads > n {
                    anyhow::bail!("i2c read error");
                }
            }
            Ok(self.temperature)
        }

        fn read_pressure_altitude(&mut self) -> Result<f64> {
            Ok(self.altitude_m)
        }
    }

    /// Fusion factice : attitude constante, échantillons comptés
    pub struct FixedAhrsFilter {
        pub pitch: f64,
        pub roll: f64,
        pub updates: Mutex<u32>,
    }

    impl AhrsFilter for FixedAhrsFilter {
        fn update(&self, _sample: &ImuSample) {
            *self.updates.lock().unwrap() += 1;
        }

        fn attitude_xy(&self) -> (f64, f64) {
            (self.pitch, self.roll)
        }
    }
}
