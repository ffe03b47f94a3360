//! Desktop shell: library lists, download tabs, conversion dialogs.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eframe::{App, Frame, egui};
use egui::Visuals;
use log::{info, warn};
use rfd::{FileDialog, MessageButtons, MessageDialog, MessageLevel};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel};

use crate::batch::{
    BatchCoordinator, BatchEvent, BatchJob, BatchMode, collect_urls, normalize_watch_url,
};
use crate::downloader::{FetchTask, YtDlp};
use crate::model::{ConversionDescriptor, QualitySelector, SlotState, TaskOutcome};
use crate::platform;
use crate::probe::{self, FfprobeService, MediaProbe};
use crate::prompt::{ParameterPrompt, PromptOutcome, convert_action_label};
use crate::state::AppState;
use crate::tools;
use crate::transcode::{TranscodeJob, TranscodeTask};

const VIDEO_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "avi", "mov", "webm"];
const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "wav", "aiff", "flac"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    YouTube,
    Shorts,
}

/// Which slot a conversion runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConvertTarget {
    Tab(Tab),
    Context,
}

/// Heights coming back from background probes.
enum ProbeReply {
    Label(PathBuf, Option<u32>),
    Convert(ConvertTarget, PathBuf, Option<u32>),
}

/// Clicks collected while drawing, applied once the frame is laid out.
enum UiAction {
    Open(PathBuf),
    Reveal(PathBuf),
    Convert(ConvertTarget, PathBuf),
    ProbeLabel(PathBuf),
    ClearRecent,
    ClearConverted,
    ImportFile,
    SetDirectory,
    AskQuality,
    StartDownload(Tab, QualitySelector),
    OpenBatch,
}

#[derive(Default)]
struct TabPanel {
    url: String,
    download: SlotState,
    conversion: SlotState,
    /// Most recent finished download, offered for conversion.
    last_download: Option<PathBuf>,
}

struct ConvertDialog {
    target: ConvertTarget,
    input: PathBuf,
    prompt: ParameterPrompt,
    choice: String,
}

impl ConvertDialog {
    fn new(target: ConvertTarget, input: PathBuf, prompt: ParameterPrompt) -> Self {
        let choice = prompt.request().options.first().cloned().unwrap_or_default();
        Self {
            target,
            input,
            prompt,
            choice,
        }
    }
}

struct BatchWindow {
    open: bool,
    tab: Tab,
    quality: QualitySelector,
    fields: Vec<String>,
    bulk: String,
    log: Vec<String>,
    progress: u8,
    events: Option<UnboundedReceiver<BatchEvent>>,
}

impl Default for BatchWindow {
    fn default() -> Self {
        Self {
            open: false,
            tab: Tab::YouTube,
            quality: QualitySelector::P1080,
            fields: vec![String::new()],
            bulk: String::new(),
            log: Vec::new(),
            progress: 0,
            events: None,
        }
    }
}

pub struct SnagApp {
    rt: Handle,
    state: AppState,
    fetcher: Arc<YtDlp>,
    probe: Arc<dyn MediaProbe>,
    dark_mode: bool,
    performance_mode: bool,
    tab: Tab,
    youtube: TabPanel,
    shorts: TabPanel,
    context_conversion: SlotState,
    /// Open while the user picks a YouTube quality.
    quality_prompt: Option<QualitySelector>,
    convert_dialog: Option<ConvertDialog>,
    batch: BatchWindow,
    /// Source heights for context-menu labels; `None` once probed means unknown.
    heights: HashMap<PathBuf, Option<u32>>,
    probing: HashSet<PathBuf>,
    probe_tx: UnboundedSender<ProbeReply>,
    probe_rx: UnboundedReceiver<ProbeReply>,
}

impl SnagApp {
    pub fn new(cc: &eframe::CreationContext<'_>, rt: Handle, state: AppState) -> Self {
        cc.egui_ctx.set_visuals(Visuals::dark());
        let (probe_tx, probe_rx) = unbounded_channel();
        Self {
            rt,
            state,
            fetcher: Arc::new(YtDlp::new()),
            probe: Arc::new(FfprobeService::new(tools::ffprobe_program())),
            dark_mode: true,
            performance_mode: false,
            tab: Tab::YouTube,
            youtube: TabPanel::default(),
            shorts: TabPanel::default(),
            context_conversion: SlotState::default(),
            quality_prompt: None,
            convert_dialog: None,
            batch: BatchWindow::default(),
            heights: HashMap::new(),
            probing: HashSet::new(),
            probe_tx,
            probe_rx,
        }
    }

    fn panel_mut(&mut self, tab: Tab) -> &mut TabPanel {
        match tab {
            Tab::YouTube => &mut self.youtube,
            Tab::Shorts => &mut self.shorts,
        }
    }

    fn conversion_slot(&mut self, target: ConvertTarget) -> &mut SlotState {
        match target {
            ConvertTarget::Tab(tab) => &mut self.panel_mut(tab).conversion,
            ConvertTarget::Context => &mut self.context_conversion,
        }
    }

    /// Drains every task channel once per frame.
    fn poll_tasks(&mut self) {
        for tab in [Tab::YouTube, Tab::Shorts] {
            match self.panel_mut(tab).download.poll() {
                Some(TaskOutcome::Finished(path)) => {
                    self.panel_mut(tab).last_download = Some(path.clone());
                    self.state.push_recent_download(path.clone());
                    notify(
                        MessageLevel::Info,
                        "Download Complete",
                        &format!("Downloaded to:\n{}", path.display()),
                    );
                }
                Some(TaskOutcome::Failed(message)) => {
                    notify(MessageLevel::Error, "Download Failed", &message);
                }
                None => {}
            }
            if let Some(outcome) = self.panel_mut(tab).conversion.poll() {
                self.conversion_finished(outcome);
            }
        }
        if let Some(outcome) = self.context_conversion.poll() {
            self.conversion_finished(outcome);
        }

        while let Ok(reply) = self.probe_rx.try_recv() {
            match reply {
                ProbeReply::Label(path, height) => {
                    self.probing.remove(&path);
                    self.heights.insert(path, height);
                }
                ProbeReply::Convert(target, path, height) => {
                    self.heights.insert(path.clone(), height);
                    self.convert_dialog =
                        Some(ConvertDialog::new(target, path, ParameterPrompt::new(height)));
                }
            }
        }

        if let Some(events) = self.batch.events.as_mut() {
            let mut finished = false;
            loop {
                match events.try_recv() {
                    Ok(BatchEvent::Log(line)) => self.batch.log.push(line),
                    Ok(BatchEvent::Progress(percent)) => self.batch.progress = percent,
                    Ok(BatchEvent::Downloaded(path)) => self.state.push_recent_download(path),
                    Ok(BatchEvent::Finished) | Err(TryRecvError::Disconnected) => {
                        finished = true;
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }
            if finished {
                self.batch.events = None;
            }
        }
    }

    fn conversion_finished(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Finished(path) => {
                self.state.push_converted_file(path.clone());
                notify(
                    MessageLevel::Info,
                    "Conversion Complete",
                    &format!("Converted file saved to:\n{}", path.display()),
                );
            }
            TaskOutcome::Failed(message) => {
                notify(MessageLevel::Error, "Conversion Failed", &message);
            }
        }
    }

    fn apply(&mut self, action: UiAction) {
        match action {
            UiAction::Open(path) => {
                if let Err(e) = platform::open_path(&path) {
                    warn!("could not open {}: {e}", path.display());
                    notify(MessageLevel::Error, "Open File", &e.to_string());
                }
            }
            UiAction::Reveal(path) => {
                if let Err(e) = platform::reveal_path(&path) {
                    warn!("could not reveal {}: {e}", path.display());
                    notify(MessageLevel::Error, "Open File Location", &e.to_string());
                }
            }
            UiAction::Convert(target, input) => {
                if let Err(e) = platform::ensure_exists(&input) {
                    warn!("cannot convert {}: {e}", input.display());
                    notify(MessageLevel::Error, "Convert", &e.to_string());
                    return;
                }
                self.begin_conversion(target, input);
            }
            UiAction::ProbeLabel(path) => self.probe_label(path),
            UiAction::ClearRecent => self.state.clear_recent_downloads(),
            UiAction::ClearConverted => self.state.clear_converted_files(),
            UiAction::ImportFile => {
                let picked = FileDialog::new()
                    .add_filter("Video", &VIDEO_EXTENSIONS)
                    .add_filter("Audio", &AUDIO_EXTENSIONS)
                    .set_directory(self.state.download_directory())
                    .pick_file();
                if let Some(path) = picked {
                    info!("imported {}", path.display());
                    self.state.push_recent_download(path);
                }
            }
            UiAction::SetDirectory => {
                let picked = FileDialog::new()
                    .set_directory(self.state.download_directory())
                    .pick_folder();
                if let Some(dir) = picked {
                    info!("download directory set to {}", dir.display());
                    self.state.set_download_directory(dir);
                }
            }
            UiAction::AskQuality => {
                self.quality_prompt.get_or_insert(QualitySelector::P1080);
            }
            UiAction::StartDownload(tab, quality) => self.start_download(tab, quality),
            UiAction::OpenBatch => {
                if self.batch.events.is_none() {
                    self.batch.tab = self.tab;
                }
                self.batch.open = true;
            }
        }
    }

    fn start_download(&mut self, tab: Tab, quality: QualitySelector) {
        let output_dir = self.state.download_directory();
        let panel = self.panel_mut(tab);
        let url = match tab {
            Tab::YouTube => normalize_watch_url(panel.url.trim()),
            Tab::Shorts => panel.url.trim().to_string(),
        };
        if url.is_empty() {
            notify(MessageLevel::Warning, "Download", "Please enter a URL.");
            return;
        }
        let (tx, rx) = unbounded_channel();
        if !panel.download.start(rx) {
            warn!("download slot busy, ignoring {url}");
            return;
        }
        panel.url = url.clone();
        let task = FetchTask::new(url, output_dir, quality, self.fetcher.clone());
        self.rt.spawn(task.run(tx));
    }

    /// Probes the source off the UI thread, then opens the parameter dialog.
    fn begin_conversion(&mut self, target: ConvertTarget, input: PathBuf) {
        if self.conversion_slot(target).is_busy() {
            return;
        }
        let probe = self.probe.clone();
        let tx = self.probe_tx.clone();
        self.rt.spawn_blocking(move || {
            let height = probe::source_height(probe.as_ref(), Some(&input));
            let _ = tx.send(ProbeReply::Convert(target, input, height));
        });
    }

    fn probe_label(&mut self, path: PathBuf) {
        if self.heights.contains_key(&path) || !self.probing.insert(path.clone()) {
            return;
        }
        let probe = self.probe.clone();
        let tx = self.probe_tx.clone();
        self.rt.spawn_blocking(move || {
            let height = probe::source_height(probe.as_ref(), Some(&path));
            let _ = tx.send(ProbeReply::Label(path, height));
        });
    }

    fn start_transcode(
        &mut self,
        target: ConvertTarget,
        input: PathBuf,
        descriptor: ConversionDescriptor,
    ) {
        let job = TranscodeJob {
            input,
            descriptor,
            performance_mode: self.performance_mode,
        };
        let (tx, rx) = unbounded_channel();
        if !self.conversion_slot(target).start(rx) {
            warn!("conversion slot busy, dropping {}", job.input.display());
            return;
        }
        self.rt.spawn(TranscodeTask::new(job, self.probe.clone()).run(tx));
    }

    fn start_batch(&mut self) {
        let urls = collect_urls(&self.batch.fields, &self.batch.bulk);
        let mode = match self.batch.tab {
            Tab::YouTube => BatchMode::Standard(self.batch.quality),
            Tab::Shorts => BatchMode::Shorts,
        };
        let job = match BatchJob::new(urls, mode) {
            Ok(job) => job,
            Err(e) => {
                notify(MessageLevel::Warning, "Batch Download", &e.to_string());
                return;
            }
        };
        let (tx, rx) = unbounded_channel();
        self.batch.log.clear();
        self.batch.progress = 0;
        self.batch.events = Some(rx);
        let coordinator =
            BatchCoordinator::new(job, self.state.download_directory(), self.fetcher.clone());
        self.rt.spawn(coordinator.run(tx));
    }

    fn top_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Snag");
                ui.separator();
                if ui.checkbox(&mut self.dark_mode, "Dark mode").changed() {
                    ctx.set_visuals(if self.dark_mode {
                        Visuals::dark()
                    } else {
                        Visuals::light()
                    });
                }
                ui.checkbox(&mut self.performance_mode, "Performance mode")
                    .on_hover_text("Faster encoding when a conversion needs scaling");
            });
        });
    }

    fn library_panel(&self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        egui::SidePanel::left("library_panel")
            .resizable(true)
            .default_width(260.0)
            .show(ctx, |ui| {
                ui.heading("Recent Downloads");
                egui::ScrollArea::vertical()
                    .id_source("recent_downloads")
                    .max_height(170.0)
                    .auto_shrink([false, true])
                    .show(ui, |ui| {
                        for path in self.state.recent_downloads() {
                            let height = self.heights.get(path).copied();
                            if height.is_none() {
                                actions.push(UiAction::ProbeLabel(path.clone()));
                            }
                            let convert_label = convert_action_label(height.flatten());
                            file_entry(ui, path, Some(convert_label), actions);
                        }
                    });
                if ui.button("Clear").clicked() {
                    actions.push(UiAction::ClearRecent);
                }

                ui.separator();
                ui.heading("Converted Files");
                egui::ScrollArea::vertical()
                    .id_source("converted_files")
                    .max_height(170.0)
                    .auto_shrink([false, true])
                    .show(ui, |ui| {
                        for path in self.state.converted_files() {
                            file_entry(ui, path, None, actions);
                        }
                    });
                if ui.button("Clear").clicked() {
                    actions.push(UiAction::ClearConverted);
                }

                ui.separator();
                ui.horizontal(|ui| {
                    if ui.button("Import File").clicked() {
                        actions.push(UiAction::ImportFile);
                    }
                    if ui.button("Set Directory").clicked() {
                        actions.push(UiAction::SetDirectory);
                    }
                });
                ui.label(format!(
                    "Saving to: {}",
                    self.state.download_directory().display()
                ));

                if self.context_conversion.is_busy() {
                    ui.separator();
                    conversion_status(ui, &self.context_conversion);
                }
            });
    }

    fn tab_panel(&mut self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.selectable_value(&mut self.tab, Tab::YouTube, "YouTube");
                ui.selectable_value(&mut self.tab, Tab::Shorts, "Shorts");
            });
            ui.separator();

            let tab = self.tab;
            let panel = match tab {
                Tab::YouTube => &mut self.youtube,
                Tab::Shorts => &mut self.shorts,
            };
            ui.label(match tab {
                Tab::YouTube => "Paste YouTube video URL:",
                Tab::Shorts => "Paste YouTube Shorts URL:",
            });
            ui.text_edit_singleline(&mut panel.url);

            ui.horizontal(|ui| {
                let idle = !panel.download.is_busy();
                if ui.add_enabled(idle, egui::Button::new("Download")).clicked() {
                    actions.push(match tab {
                        Tab::YouTube => UiAction::AskQuality,
                        Tab::Shorts => UiAction::StartDownload(Tab::Shorts, QualitySelector::Shorts),
                    });
                }
                let can_convert = panel.last_download.is_some() && !panel.conversion.is_busy();
                if ui.add_enabled(can_convert, egui::Button::new("Convert")).clicked() {
                    if let Some(path) = &panel.last_download {
                        actions.push(UiAction::Convert(ConvertTarget::Tab(tab), path.clone()));
                    }
                }
                if ui.button("Batch Download").clicked() {
                    actions.push(UiAction::OpenBatch);
                }
            });

            ui.add_space(8.0);
            if panel.download.is_busy() {
                match panel.download.progress() {
                    Some(progress) => {
                        ui.add(
                            egui::ProgressBar::new(f32::from(progress.percent) / 100.0)
                                .show_percentage(),
                        );
                        ui.label(format!("Downloading: {}", progress.note));
                    }
                    None => {
                        ui.label("Starting download...");
                    }
                }
            } else if let Some(path) = &panel.last_download {
                ui.label(format!("Last download: {}", display_name(path)));
            }
            if panel.conversion.is_busy() {
                conversion_status(ui, &panel.conversion);
            }
        });
    }

    fn quality_window(&mut self, ctx: &egui::Context, actions: &mut Vec<UiAction>) {
        let Some(choice) = self.quality_prompt.as_mut() else {
            return;
        };
        let mut close = false;
        egui::Window::new("Select Quality")
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                egui::ComboBox::from_id_source("quality_choice")
                    .selected_text(choice.label())
                    .show_ui(ui, |ui| {
                        for quality in QualitySelector::STANDARD {
                            ui.selectable_value(&mut *choice, quality, quality.label());
                        }
                    });
                ui.horizontal(|ui| {
                    if ui.button("Download").clicked() {
                        actions.push(UiAction::StartDownload(Tab::YouTube, *choice));
                        close = true;
                    }
                    if ui.button("Cancel").clicked() {
                        close = true;
                    }
                });
            });
        if close {
            self.quality_prompt = None;
        }
    }

    fn convert_window(&mut self, ctx: &egui::Context) {
        let Some(dialog) = self.convert_dialog.as_mut() else {
            return;
        };
        let request = dialog.prompt.request();
        let (mut submit, mut cancel) = (false, false);
        egui::Window::new(request.title)
            .id(egui::Id::new("convert_dialog"))
            .collapsible(false)
            .resizable(false)
            .show(ctx, |ui| {
                ui.label(display_name(&dialog.input));
                ui.horizontal(|ui| {
                    ui.label(request.label.as_str());
                    egui::ComboBox::from_id_source("convert_choice")
                        .selected_text(dialog.choice.as_str())
                        .show_ui(ui, |ui| {
                            for option in &request.options {
                                ui.selectable_value(&mut dialog.choice, option.clone(), option.as_str());
                            }
                        });
                });
                ui.horizontal(|ui| {
                    submit = ui.button("OK").clicked();
                    cancel = ui.button("Cancel").clicked();
                });
            });

        if cancel {
            info!("conversion cancelled");
            self.convert_dialog = None;
        } else if submit {
            let Some(dialog) = self.convert_dialog.take() else {
                return;
            };
            match dialog.prompt.answer(&dialog.choice) {
                PromptOutcome::Next(prompt) => {
                    self.convert_dialog =
                        Some(ConvertDialog::new(dialog.target, dialog.input, prompt));
                }
                PromptOutcome::Resolved(descriptor) => {
                    self.start_transcode(dialog.target, dialog.input, descriptor);
                }
                PromptOutcome::Cancelled => info!("conversion cancelled"),
            }
        }
    }

    fn batch_window(&mut self, ctx: &egui::Context) {
        if !self.batch.open {
            return;
        }
        let mut open = true;
        let mut start = false;
        let batch = &mut self.batch;
        egui::Window::new("Batch Download")
            .open(&mut open)
            .default_width(480.0)
            .show(ctx, |ui| {
                let running = batch.events.is_some();
                match batch.tab {
                    Tab::YouTube => {
                        egui::ComboBox::from_label("Quality")
                            .selected_text(batch.quality.label())
                            .show_ui(ui, |ui| {
                                for quality in QualitySelector::STANDARD {
                                    ui.selectable_value(&mut batch.quality, quality, quality.label());
                                }
                            });
                    }
                    Tab::Shorts => {
                        ui.label("Quality: Shorts");
                    }
                }

                ui.label("URLs:");
                for field in batch.fields.iter_mut() {
                    ui.text_edit_singleline(field);
                }
                if ui.button("Add URL").clicked() {
                    batch.fields.push(String::new());
                }
                ui.label("Or paste several, separated by commas or new lines:");
                ui.text_edit_multiline(&mut batch.bulk);

                if ui
                    .add_enabled(!running, egui::Button::new("Start Batch"))
                    .clicked()
                {
                    start = true;
                }
                ui.add(egui::ProgressBar::new(f32::from(batch.progress) / 100.0).show_percentage());
                egui::ScrollArea::vertical()
                    .id_source("batch_log")
                    .max_height(160.0)
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        for line in &batch.log {
                            ui.label(line.as_str());
                        }
                    });
            });
        batch.open = open;
        if start {
            self.start_batch();
        }
    }
}

impl App for SnagApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        self.poll_tasks();

        let mut actions = Vec::new();
        self.top_bar(ctx);
        self.library_panel(ctx, &mut actions);
        self.tab_panel(ctx, &mut actions);
        self.quality_window(ctx, &mut actions);
        self.convert_window(ctx);
        self.batch_window(ctx);
        for action in actions {
            self.apply(action);
        }

        // Keep progress moving while tasks report in the background.
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

/// One list row: double-click opens, right-click offers the file actions.
fn file_entry(
    ui: &mut egui::Ui,
    path: &Path,
    convert_label: Option<&str>,
    actions: &mut Vec<UiAction>,
) {
    let response = ui
        .add(egui::Label::new(display_name(path)).sense(egui::Sense::click()))
        .on_hover_text(path.display().to_string());
    if response.double_clicked() {
        actions.push(UiAction::Open(path.to_path_buf()));
    }
    response.context_menu(|ui| {
        if ui.button("Open File").clicked() {
            actions.push(UiAction::Open(path.to_path_buf()));
            ui.close_menu();
        }
        if let Some(label) = convert_label {
            if ui.button(label).clicked() {
                actions.push(UiAction::Convert(ConvertTarget::Context, path.to_path_buf()));
                ui.close_menu();
            }
        }
        if ui.button("Open File Location").clicked() {
            actions.push(UiAction::Reveal(path.to_path_buf()));
            ui.close_menu();
        }
    });
}

fn conversion_status(ui: &mut egui::Ui, slot: &SlotState) {
    match slot.progress() {
        Some(progress) => {
            ui.add(egui::ProgressBar::new(f32::from(progress.percent) / 100.0));
            ui.label(format!(
                "{}% completed, Time remaining: {}",
                progress.percent, progress.note
            ));
        }
        None => {
            ui.label("Preparing conversion...");
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Blocking message box; only used for single-task outcomes and input errors.
fn notify(level: MessageLevel, title: &str, description: &str) {
    let _ = MessageDialog::new()
        .set_level(level)
        .set_title(title)
        .set_description(description)
        .set_buttons(MessageButtons::Ok)
        .show();
}
