use crate::{
    config::PanelConfig,
    error::RenderError,
    types::{Icon, PowerTier, WakeReason},
};

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub message: String,
    pub icon: Icon,
    pub show_debug_overlay: bool,
    pub wake_reason: WakeReason,
    pub voltage: f32,
    pub tier: PowerTier,
    pub link_connected: bool,
    pub rssi: Option<i8>,
}

impl RenderRequest {
    /// Diagnostic lines drawn under the message when the overlay is on.
    pub fn overlay_lines(&self) -> Vec<String> {
        if !self.show_debug_overlay {
            return Vec::new();
        }
        let link = match (self.link_connected, self.rssi) {
            (true, Some(rssi)) => format!("wifi {rssi} dBm"),
            (true, None) => "wifi up".to_string(),
            (false, _) => "wifi down".to_string(),
        };
        vec![
            format!("wake {}", self.wake_reason.as_str().to_ascii_lowercase()),
            link,
            format!(
                "battery {:.2} V {}",
                self.voltage,
                self.tier.as_str().to_ascii_lowercase()
            ),
        ]
    }
}

/// Draws a full frame and blocks until the panel has refreshed.
pub trait Renderer {
    fn render(&mut self, request: &RenderRequest) -> Result<(), RenderError>;
}

/// 1-bit frame buffer for the panel.
#[derive(Debug)]
pub struct FrameSurface {
    width: u16,
    height: u16,
    pixels: Vec<u8>,
}

impl FrameSurface {
    pub fn bytes_for(panel: &PanelConfig) -> usize {
        usize::from(panel.width).div_ceil(8) * usize::from(panel.height)
    }

    pub fn allocate(panel: &PanelConfig) -> Result<Self, RenderError> {
        let bytes = Self::bytes_for(panel);
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(bytes)
            .map_err(|_| RenderError::ResourceExhaustion { bytes })?;
        pixels.resize(bytes, 0xFF);
        Ok(Self {
            width: panel.width,
            height: panel.height,
            pixels,
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(show_debug_overlay: bool) -> RenderRequest {
        RenderRequest {
            message: "Room A, free for the day".to_string(),
            icon: Icon::Free,
            show_debug_overlay,
            wake_reason: WakeReason::ColdOrOther,
            voltage: 3.914,
            tier: PowerTier::Normal,
            link_connected: true,
            rssi: Some(-58),
        }
    }

    #[test]
    fn overlay_lines_only_when_enabled() {
        assert!(request(false).overlay_lines().is_empty());
        assert_eq!(
            request(true).overlay_lines(),
            vec!["wake cold_or_other", "wifi -58 dBm", "battery 3.91 V normal"]
        );
    }

    #[test]
    fn overlay_names_battery_tier() {
        let mut req = request(true);
        req.voltage = 3.2;
        req.tier = PowerTier::Low;
        assert_eq!(req.overlay_lines()[2], "battery 3.20 V low");
    }

    #[test]
    fn overlay_reports_link_down() {
        let mut req = request(true);
        req.link_connected = false;
        req.rssi = None;
        assert_eq!(req.overlay_lines()[1], "wifi down");
    }

    #[test]
    fn surface_size_rounds_rows_up() {
        let panel = PanelConfig::default();
        assert_eq!(FrameSurface::bytes_for(&panel), 4_736);

        let odd = PanelConfig {
            width: 250,
            height: 122,
        };
        assert_eq!(FrameSurface::bytes_for(&odd), 32 * 122);

        let surface = FrameSurface::allocate(&panel).unwrap();
        assert_eq!(surface.as_bytes().len(), 4_736);
        assert!(surface.as_bytes().iter().all(|byte| *byte == 0xFF));
    }
}
