use crate::session::TurnRole;
use eframe::egui::{self, Color32, CornerRadius, FontId, Frame, Margin, Stroke, TextStyle};

#[derive(Debug, Clone)]
pub struct Theme {
    pub surface_1: Color32,
    pub surface_2: Color32,
    pub surface_3: Color32,
    pub accent_primary: Color32,
    pub accent_muted: Color32,
    pub warning: Color32,
    pub danger: Color32,
    pub text_primary: Color32,
    pub text_muted: Color32,
    pub text_on_accent: Color32,
    pub border_subtle: Color32,
    pub spacing_8: f32,
    pub spacing_12: f32,
    pub radius_10: u8,
    pub radius_12: u8,
    pub trigger_size: f32,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            surface_1: Color32::from_rgb(0x15, 0x1D, 0x18),
            surface_2: Color32::from_rgb(0x1C, 0x27, 0x20),
            surface_3: Color32::from_rgb(0x24, 0x32, 0x29),
            accent_primary: Color32::from_rgb(0x22, 0xC5, 0x5E),
            accent_muted: Color32::from_rgb(0x16, 0xA3, 0x4A),
            warning: Color32::from_rgb(0xF5, 0x9E, 0x0B),
            danger: Color32::from_rgb(0xEF, 0x44, 0x44),
            text_primary: Color32::from_rgb(0xE6, 0xF3, 0xEA),
            text_muted: Color32::from_rgb(0x8B, 0x9E, 0x92),
            text_on_accent: Color32::from_rgb(0xF8, 0xFF, 0xFA),
            border_subtle: Color32::from_rgba_premultiplied(255, 255, 255, 13),
            spacing_8: Self::P8,
            spacing_12: Self::P12,
            radius_10: 10,
            radius_12: Self::R12,
            trigger_size: 56.0,
        }
    }
}

impl Theme {
    pub const R12: u8 = 12;
    pub const P8: f32 = 8.0;
    pub const P12: f32 = 12.0;

    pub fn apply_visuals(&self, ctx: &egui::Context) {
        let mut visuals = egui::Visuals::dark();
        visuals.panel_fill = Color32::TRANSPARENT;
        visuals.override_text_color = Some(self.text_primary);
        visuals.widgets.noninteractive.bg_fill = self.surface_2;
        visuals.widgets.noninteractive.bg_stroke = Stroke::NONE;
        visuals.widgets.inactive.bg_fill = self.surface_2;
        visuals.widgets.inactive.weak_bg_fill = self.surface_2;
        visuals.widgets.inactive.bg_stroke = Stroke::NONE;
        visuals.widgets.hovered.bg_fill = self.surface_3;
        visuals.widgets.hovered.weak_bg_fill = self.surface_3;
        visuals.widgets.hovered.bg_stroke = Stroke::NONE;
        visuals.widgets.active.bg_fill = self.accent_muted;
        visuals.widgets.active.bg_stroke = Stroke::NONE;
        visuals.selection.bg_fill = self.accent_muted;
        visuals.hyperlink_color = self.accent_primary;
        visuals.window_fill = self.surface_1;
        visuals.window_stroke = Stroke::NONE;
        visuals.window_corner_radius = CornerRadius::same(self.radius_12);

        let mut style = (*ctx.style()).clone();
        style.visuals = visuals;
        style.spacing.item_spacing = egui::vec2(8.0, 8.0);
        style.spacing.button_padding = egui::vec2(10.0, 6.0);
        style.text_styles.insert(TextStyle::Heading, FontId::proportional(16.0));
        style.text_styles.insert(TextStyle::Body, FontId::proportional(14.0));
        style.text_styles.insert(TextStyle::Small, FontId::proportional(11.0));
        ctx.set_style(style);
    }

    /// Rounded card holding the whole chat panel.
    pub fn panel_frame(&self) -> Frame {
        Frame::new()
            .fill(self.surface_1)
            .inner_margin(Margin::same(self.spacing_12 as i8))
            .corner_radius(CornerRadius::same(self.radius_12))
            .stroke(Stroke::new(1.0, self.border_subtle))
            .shadow(egui::epaint::Shadow {
                offset: [0, 4],
                blur: 18,
                spread: 0,
                color: Color32::from_rgba_premultiplied(0, 0, 0, 64),
            })
    }

    pub fn composer_frame(&self) -> Frame {
        Frame::new()
            .fill(self.surface_2)
            .inner_margin(Margin::symmetric(self.spacing_8 as i8, 6))
            .corner_radius(CornerRadius::same(self.radius_10))
    }

    pub fn bubble_frame(&self, role: TurnRole) -> Frame {
        let (fill, text) = self.bubble_colors(role);
        Frame::new()
            .fill(fill)
            .stroke(Stroke::new(1.0, text.gamma_multiply(0.15)))
            .inner_margin(Margin::symmetric(self.spacing_12 as i8, 8))
            .corner_radius(CornerRadius::same(self.radius_10))
    }

    pub fn bubble_colors(&self, role: TurnRole) -> (Color32, Color32) {
        match role {
            TurnRole::User => (self.accent_muted, self.text_on_accent),
            TurnRole::Assistant => (self.surface_2, self.text_primary),
            TurnRole::Thinking => (self.surface_2, self.text_muted),
            TurnRole::Error => (self.danger.gamma_multiply(0.25), self.text_primary),
        }
    }
}
