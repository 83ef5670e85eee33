//! Spectral line catalog.
//!
//! Chromospheric lines are multiplets addressed by a short label (`"10830"`),
//! photospheric lines by numeric catalog identifiers.

use helio_core::{HelioError, Result};

/// Larmor constant `e / (4π m_e c²)` in Å⁻¹ G⁻¹.
pub const LARMOR: f64 = 4.6686e-13;

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT: f64 = 2.997_924_58e5;

/// One Zeeman component of a line or multiplet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineComponent {
    /// Central wavelength (Å)
    pub lambda0: f64,
    /// Effective Landé factor
    pub g_eff: f64,
    /// Relative strength, normalized over the multiplet
    pub strength: f64,
}

/// A chromospheric multiplet.
#[derive(Debug, Clone, PartialEq)]
pub struct Multiplet {
    pub label: String,
    pub components: Vec<LineComponent>,
}

/// A photospheric line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotosphericLine {
    pub id: u32,
    pub species: &'static str,
    pub lambda0: f64,
    pub g_eff: f64,
}

const PHOTOSPHERIC_LINES: &[PhotosphericLine] = &[
    PhotosphericLine { id: 200, species: "Fe I", lambda0: 6301.5012, g_eff: 1.67 },
    PhotosphericLine { id: 201, species: "Fe I", lambda0: 6302.4936, g_eff: 2.5 },
    PhotosphericLine { id: 300, species: "Si I", lambda0: 10827.089, g_eff: 1.5 },
    PhotosphericLine { id: 400, species: "Fe I", lambda0: 15648.515, g_eff: 3.0 },
];

/// Looks up a chromospheric multiplet by label.
pub fn multiplet(label: &str) -> Result<Multiplet> {
    let raw: &[(f64, f64, f64)] = match label {
        // He I triplet: Tr1, Tr2, Tr3 with 1:3:5 strengths
        "10830" => &[
            (10829.0911, 2.00, 1.0),
            (10830.2501, 1.75, 3.0),
            (10830.3398, 0.875, 5.0),
        ],
        "5876" => &[(5875.9663, 1.13, 1.0)],
        "8542" => &[(8542.091, 1.10, 1.0)],
        _ => {
            return Err(HelioError::config(format!(
                "unknown chromospheric line '{}' (known: 10830, 5876, 8542)",
                label
            )))
        }
    };
    let total: f64 = raw.iter().map(|(_, _, s)| s).sum();
    Ok(Multiplet {
        label: label.to_string(),
        components: raw
            .iter()
            .map(|&(lambda0, g_eff, s)| LineComponent {
                lambda0,
                g_eff,
                strength: s / total,
            })
            .collect(),
    })
}

/// Looks up a photospheric line by catalog identifier.
pub fn photospheric_line(id: u32) -> Result<PhotosphericLine> {
    PHOTOSPHERIC_LINES
        .iter()
        .copied()
        .find(|l| l.id == id)
        .ok_or_else(|| HelioError::config(format!("unknown photospheric line id {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_he_triplet_strengths_normalized() {
        let m = multiplet("10830").unwrap();
        assert_eq!(m.components.len(), 3);
        let total: f64 = m.components.iter().map(|c| c.strength).sum();
        assert_relative_eq!(total, 1.0);
        assert_relative_eq!(m.components[2].strength, 5.0 / 9.0);
    }

    #[test]
    fn test_unknown_lines() {
        assert!(multiplet("1083").is_err());
        assert!(photospheric_line(999).is_err());
        assert_relative_eq!(photospheric_line(300).unwrap().lambda0, 10827.089);
    }
}
