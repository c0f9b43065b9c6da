//! ==============================================================================
//! recommendations.rs - healthy home office threshold rule
//! ==============================================================================
//!
//! purpose:
//!     turns a reported snapshot into the list of recommendations the cloud
//!     rule writes back into the shadow's desired state. the loopback
//!     transport runs it in-process so the delta path works offline.
//!
//! units: temperature in device °F, noise 0-255, light in raw millivolts
//! (higher = darker), tvoc and eco2 as reported by the gas sensor.
//!
//! ==============================================================================

use crate::domain::MeasurementSnapshot;

pub fn recommend(m: &MeasurementSnapshot) -> Vec<&'static str> {
    let mut out = Vec::new();

    if m.temperature >= 100.0 {
        out.push("Dangerously high temperature!");
    } else if m.temperature >= 80.0 {
        out.push("Its a little warm in here.");
    } else if m.temperature < 70.0 {
        out.push("Its a little chilly in here.");
    }

    if m.noise_level >= 200 {
        out.push("Dangerously high levels of noise!");
    } else if m.noise_level >= 50 {
        out.push("Its a little too noisy.");
    }

    if m.light_intensity >= 2250 {
        out.push("Its a little too dark in here.");
    } else if m.light_intensity <= 1000 {
        out.push("Its a little too bright in here.");
    }

    if m.tvoc >= 20 {
        out.push("Dangerous air quality levels!");
    } else if m.tvoc >= 5 {
        out.push("TVOC is a little high.");
    }

    if m.eco2 >= 5000 {
        out.push("Dangerous ambient CO2 levels!");
    } else if m.eco2 >= 500 {
        out.push("High CO2 levels - maybe open a window?");
    } else if m.eco2 < 100 {
        out.push("CO2 levels seem a bit low.");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comfortable_office_has_no_recommendations() {
        let m = MeasurementSnapshot {
            temperature: 72.5,
            noise_level: 10,
            light_intensity: 1500,
            tvoc: 1,
            eco2: 400,
        };
        assert!(recommend(&m).is_empty());
    }

    #[test]
    fn test_thresholds() {
        let m = MeasurementSnapshot {
            temperature: 85.0,
            noise_level: 210,
            light_intensity: 400,
            tvoc: 20,
            eco2: 450,
        };
        assert_eq!(
            recommend(&m),
            vec![
                "Its a little warm in here.",
                "Dangerously high levels of noise!",
                "Its a little too bright in here.",
                "Dangerous air quality levels!",
            ]
        );

        let cold = MeasurementSnapshot { temperature: 60.0, eco2: 50, light_intensity: 3000, ..m };
        let r = recommend(&cold);
        assert_eq!(r[0], "Its a little chilly in here.");
        assert!(r.contains(&"Its a little too dark in here."));
        assert!(r.contains(&"CO2 levels seem a bit low."));
    }
}
