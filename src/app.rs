use crate::event::{AppEvent, ShellCommand};
use crate::overlay::{AuthMode, AuthView, OverlayController, Visibility};
use crate::session::TurnRole;
use crate::theme::Theme;
use crate::update::{UpdateHandle, UpdateState};
use eframe::egui::{self, Align, CornerRadius, Layout, RichText, ScrollArea};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::UnboundedReceiver;

const IDLE_REPAINT: Duration = Duration::from_secs(1);
const BUSY_REPAINT: Duration = Duration::from_millis(100);

#[derive(Default)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Default)]
struct RegisterForm {
    username: String,
    email: String,
    password: String,
}

pub struct OverlayApp {
    rx: UnboundedReceiver<AppEvent>,
    controller: OverlayController,
    updates: Option<UpdateHandle>,
    theme: Theme,
    theme_applied: bool,
    api_url: String,
    input_buffer: String,
    login_form: LoginForm,
    register_form: RegisterForm,
    scroll_to_bottom: bool,
    commands: Vec<ShellCommand>,
}

impl OverlayApp {
    pub fn new(
        rx: UnboundedReceiver<AppEvent>,
        controller: OverlayController,
        updates: Option<UpdateHandle>,
        api_url: String,
    ) -> Self {
        Self {
            rx,
            controller,
            updates,
            theme: Theme::default(),
            theme_applied: false,
            api_url,
            input_buffer: String::new(),
            login_form: LoginForm::default(),
            register_form: RegisterForm::default(),
            scroll_to_bottom: false,
            commands: Vec::new(),
        }
    }

    fn drain_events(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if matches!(event, AppEvent::ChatResolved { .. }) {
                        self.scroll_to_bottom = true;
                    }
                    self.controller.apply_event(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    tracing::warn!("event channel disconnected");
                    break;
                }
            }
        }
    }

    fn handle_commands(&mut self, ctx: &egui::Context) {
        for command in std::mem::take(&mut self.commands) {
            tracing::debug!(?command, "shell command");
            match command {
                ShellCommand::Minimize => {
                    ctx.send_viewport_cmd(egui::ViewportCommand::Minimized(true));
                }
                ShellCommand::Quit => ctx.send_viewport_cmd(egui::ViewportCommand::Close),
                ShellCommand::CheckForUpdate => match &self.updates {
                    Some(updates) => updates.check_now(),
                    None => tracing::info!("update checks are disabled, no feed configured"),
                },
                ShellCommand::TriggerUpdate => {
                    let ready = self
                        .controller
                        .update_notice()
                        .is_some_and(|notice| notice.state == UpdateState::Downloaded);
                    if ready {
                        tracing::info!("quitting to install update");
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                }
            }
        }
    }

    fn render_trigger(&mut self, ctx: &egui::Context) {
        let size = self.theme.trigger_size;
        egui::CentralPanel::default()
            .frame(egui::Frame::new())
            .show(ctx, |ui| {
                ui.with_layout(Layout::bottom_up(Align::Max), |ui| {
                    let button = egui::Button::new(
                        RichText::new("G")
                            .size(24.0)
                            .strong()
                            .color(self.theme.text_on_accent),
                    )
                    .fill(self.theme.accent_primary)
                    .corner_radius(CornerRadius::same((size / 2.0) as u8))
                    .min_size(egui::vec2(size, size));
                    if ui.add(button).on_hover_text("Open Greenie").clicked() {
                        self.controller.open_panel();
                    }
                });
            });
    }

    fn render_header(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading(RichText::new("Greenie").color(self.theme.accent_primary));
            if let Some(status) = self
                .controller
                .update_notice()
                .and_then(|notice| notice.status_text())
            {
                ui.label(RichText::new(status).small().color(self.theme.warning));
            }

            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                if ui.small_button("x").on_hover_text("Hide window").clicked() {
                    self.commands.push(ShellCommand::Minimize);
                }
                if ui.small_button("-").on_hover_text("Minimize").clicked() {
                    self.controller.minimize_panel();
                }
                ui.menu_button("...", |ui| {
                    if ui.button("Check for updates").clicked() {
                        self.commands.push(ShellCommand::CheckForUpdate);
                        ui.close_menu();
                    }
                    let downloaded = self
                        .controller
                        .update_notice()
                        .is_some_and(|notice| notice.state == UpdateState::Downloaded);
                    if ui
                        .add_enabled(downloaded, egui::Button::new("Restart to update"))
                        .clicked()
                    {
                        self.commands.push(ShellCommand::TriggerUpdate);
                        ui.close_menu();
                    }
                    ui.separator();
                    ui.label(RichText::new(&self.api_url).small().color(self.theme.text_muted));
                    if ui.button("Quit Greenie").clicked() {
                        self.commands.push(ShellCommand::Quit);
                        ui.close_menu();
                    }
                });
            });
        });
    }

    fn render_auth(&mut self, ui: &mut egui::Ui) {
        let pending = self.controller.auth_pending();
        ui.horizontal(|ui| {
            let view = self.controller.auth_view();
            if ui.selectable_label(view == AuthView::Login, "Log in").clicked() {
                self.controller.show_auth_view(AuthView::Login);
            }
            if ui
                .selectable_label(view == AuthView::Register, "Register")
                .clicked()
            {
                self.controller.show_auth_view(AuthView::Register);
            }
        });
        ui.separator();

        match self.controller.auth_view() {
            AuthView::Login => {
                ui.add(egui::TextEdit::singleline(&mut self.login_form.username).hint_text("Username"));
                let password = ui.add(
                    egui::TextEdit::singleline(&mut self.login_form.password)
                        .password(true)
                        .hint_text("Password"),
                );
                let submitted =
                    password.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                let clicked = ui
                    .add_enabled(!pending, egui::Button::new("Log in"))
                    .clicked();
                if (clicked || submitted) && !pending {
                    self.controller
                        .login(&self.login_form.username, &self.login_form.password);
                }
                if let Some(error) = self.controller.login_error() {
                    ui.label(RichText::new(error).color(self.theme.danger));
                }
            }
            AuthView::Register => {
                ui.add(
                    egui::TextEdit::singleline(&mut self.register_form.username)
                        .hint_text("Username"),
                );
                ui.add(egui::TextEdit::singleline(&mut self.register_form.email).hint_text("Email"));
                ui.add(
                    egui::TextEdit::singleline(&mut self.register_form.password)
                        .password(true)
                        .hint_text("Password"),
                );
                if ui
                    .add_enabled(!pending, egui::Button::new("Create account"))
                    .clicked()
                {
                    self.controller.register(
                        &self.register_form.username,
                        &self.register_form.email,
                        &self.register_form.password,
                    );
                }
                if let Some(error) = self.controller.register_error() {
                    ui.label(RichText::new(error).color(self.theme.danger));
                }
            }
        }

        if pending {
            ui.spinner();
        }
        ui.add_space(self.theme.spacing_8);
        if ui.link("Continue as guest").clicked() {
            self.controller.continue_as_guest();
        }
    }

    fn render_chat(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            match self.controller.mode() {
                AuthMode::Authenticated => {
                    let username = self.controller.session().username.clone().unwrap_or_default();
                    ui.label(RichText::new(username).strong());
                }
                _ => {
                    ui.label(RichText::new("Guest").color(self.theme.text_muted));
                }
            }
            ui.with_layout(Layout::right_to_left(Align::Center), |ui| {
                let leave = match self.controller.mode() {
                    AuthMode::Authenticated => "Log out",
                    _ => "Sign in",
                };
                if ui.small_button(leave).clicked() {
                    self.login_form = LoginForm::default();
                    self.register_form = RegisterForm::default();
                    self.input_buffer.clear();
                    self.controller.logout();
                }
                if ui.small_button("New chat").clicked() {
                    self.controller.reset_conversation();
                }
            });
        });
        ui.separator();

        let transcript_height = (ui.available_height() - 60.0).max(120.0);
        ScrollArea::vertical()
            .id_salt("chat_transcript")
            .max_height(transcript_height)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                let initial = self
                    .controller
                    .session()
                    .username
                    .as_deref()
                    .and_then(|name| name.chars().next())
                    .unwrap_or('G')
                    .to_ascii_uppercase();
                for turn in self.controller.turns() {
                    let layout = if turn.role == TurnRole::User {
                        Layout::right_to_left(Align::Min)
                    } else {
                        Layout::left_to_right(Align::Min)
                    };
                    ui.with_layout(layout, |ui| {
                        let avatar = match turn.role {
                            TurnRole::User => initial.to_string(),
                            _ => "G".to_string(),
                        };
                        ui.label(RichText::new(avatar).strong().color(self.theme.accent_primary));
                        let (_, text_color) = self.theme.bubble_colors(turn.role);
                        self.theme.bubble_frame(turn.role).show(ui, |ui| {
                            ui.set_max_width(260.0);
                            let text = RichText::new(&turn.text).color(text_color);
                            let text = if turn.role == TurnRole::Thinking {
                                text.italics()
                            } else {
                                text
                            };
                            ui.label(text);
                        })
                        .response
                        .on_hover_text(
                            turn.timestamp
                                .with_timezone(&chrono::Local)
                                .format("%H:%M")
                                .to_string(),
                        );
                    });
                }
                if self.scroll_to_bottom {
                    ui.scroll_to_cursor(Some(Align::BOTTOM));
                }
            });
        self.scroll_to_bottom = false;

        ui.separator();
        let mut send_now = false;
        self.theme.composer_frame().show(ui, |ui| {
            ui.horizontal(|ui| {
                let response = ui.add(
                    egui::TextEdit::singleline(&mut self.input_buffer)
                        .desired_width(ui.available_width() - 60.0)
                        .hint_text("Type a message..."),
                );
                if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    send_now = true;
                    response.request_focus();
                }
                send_now |= ui
                    .add_enabled(
                        !self.input_buffer.trim().is_empty(),
                        egui::Button::new("Send"),
                    )
                    .clicked();
            });
        });

        if send_now && self.controller.send(&self.input_buffer).is_some() {
            self.input_buffer.clear();
            self.scroll_to_bottom = true;
        }
    }

    fn render_panel(&mut self, ctx: &egui::Context) {
        let frame = self.theme.panel_frame();
        egui::CentralPanel::default()
            .frame(egui::Frame::new())
            .show(ctx, |ui| {
                frame.show(ui, |ui| {
                    ui.set_min_size(ui.available_size());
                    self.render_header(ui);
                    ui.separator();
                    if self.controller.chat_active() {
                        self.render_chat(ui);
                    } else {
                        self.render_auth(ui);
                    }
                });
            });
    }
}

impl eframe::App for OverlayApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if !self.theme_applied {
            self.theme.apply_visuals(ctx);
            self.theme_applied = true;
        }

        self.drain_events();
        match self.controller.visibility() {
            Visibility::Trigger => self.render_trigger(ctx),
            Visibility::Panel => self.render_panel(ctx),
        }
        self.handle_commands(ctx);

        // Background results arrive on the channel, so keep polling it.
        let delay = if self.controller.has_pending_work() {
            BUSY_REPAINT
        } else {
            IDLE_REPAINT
        };
        ctx.request_repaint_after(delay);
    }

    fn clear_color(&self, _visuals: &egui::Visuals) -> [f32; 4] {
        egui::Rgba::TRANSPARENT.to_array()
    }
}
