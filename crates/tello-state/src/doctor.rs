use anyhow::Result;

// Roughly Dead Sea shore to Everest summit.
const MIN_PLAUSIBLE_CM: f64 = -50_000.0;
const MAX_PLAUSIBLE_CM: f64 = 900_000.0;

pub fn check_altimeter(barometric_cm: f64, actual_cm: f64) -> Result<()> {
    anyhow::ensure!(barometric_cm.is_finite(), "altimeter.barometric_cm must be finite");
    anyhow::ensure!(actual_cm.is_finite(), "altimeter.actual_cm must be finite");
    anyhow::ensure!(
        (MIN_PLAUSIBLE_CM..=MAX_PLAUSIBLE_CM).contains(&actual_cm),
        "altimeter.actual_cm out of range"
    );
    Ok(())
}
