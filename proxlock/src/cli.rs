//! Terminal presentation layer.
//!
//! Every command builds the repositories it needs, performs one user intent, renders the
//! resulting view model to stdout and leaves failures in [`Notices`] for the caller to print on
//! stderr. Views are rendered from [`Section`]s, so a section that failed to load shows its error
//! next to the sections that did load.

use clap::{Args as ClapArgs, Subcommand};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::api::{ProxyApi, ReqwestProxyApi};
use crate::api::models::{
    api_keys::ApiKey,
    device_check::DeviceCheckCredential,
    projects::Project,
    users::User,
};
use crate::api::proxy::{ProxiedRequest, ProxiedResponse};
use crate::auth;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::forms::{DeviceCheckForm, KeyEditForm, KeyForm, ProjectForm};
use crate::invalidation::{InvalidationBus, Topic};
use crate::notices::{NoticeLevel, Notices};
use crate::reveal::{Clipboard, CommandClipboard, RevealState, SecretReveal};
use crate::store::{DeviceCheckPoolRepository, ProjectPage, ProjectsRepository, Section, UserRepository};
use crate::types::{ApiKeyId, ProjectId};
use crate::usage::{UsageBanner, run_usage_poller};

const UPSTREAM_API_KEY_ENV: &str = "PROXLOCK_UPSTREAM_API_KEY";
const PARTIAL_KEY_ENV: &str = "PROXLOCK_PARTIAL_KEY";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the signed-in user
    Me {
        /// Register the signed-in identity with the backend first
        #[arg(long)]
        register: bool,
    },
    /// Show request usage against the plan limit
    Usage {
        /// Keep refreshing every `usage.refresh_interval` until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Manage projects
    #[command(subcommand)]
    Projects(ProjectsCommand),
    /// Manage a project's split API keys
    #[command(subcommand)]
    Keys(KeysCommand),
    /// Manage Apple DeviceCheck credentials
    #[command(subcommand, name = "device-check")]
    DeviceCheck(DeviceCheckCommand),
    /// Send a request through the proxy using a partial key
    Proxy(ProxyArgs),
}

#[derive(Subcommand, Debug)]
pub enum ProjectsCommand {
    /// List projects with their key counts
    List,
    /// Show a project with its keys and DeviceCheck credential
    Show { project: ProjectId },
    Create {
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Change a project's name or description; omitted fields keep their value
    Update {
        project: ProjectId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete { project: ProjectId },
}

#[derive(Subcommand, Debug)]
pub enum KeysCommand {
    List {
        project: ProjectId,
    },
    /// Split an upstream API key. The partial key is printed once and cannot be shown again.
    ///
    /// The full upstream key is taken from `PROXLOCK_UPSTREAM_API_KEY`, or read from stdin.
    Create {
        project: ProjectId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Pipe the partial key into this command (e.g. `pbcopy`) instead of printing it
        #[arg(long)]
        copy_with: Option<String>,
    },
    Update {
        project: ProjectId,
        key: ApiKeyId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Delete {
        project: ProjectId,
        key: ApiKeyId,
    },
}

#[derive(Subcommand, Debug)]
pub enum DeviceCheckCommand {
    /// Show the credential attached to a project
    Show { project: ProjectId },
    /// Upload a new credential and attach it to a project
    Upload {
        project: ProjectId,
        /// Apple developer team ID (10 characters)
        #[arg(long)]
        team_id: String,
        #[arg(long)]
        key_id: String,
        /// `.p8` private key file; sent once and not kept
        #[arg(long)]
        private_key_file: PathBuf,
    },
    /// Attach a credential from your pool to a project
    Link {
        project: ProjectId,
        #[arg(long)]
        team_id: String,
        #[arg(long)]
        key_id: String,
    },
    /// List credentials that can be linked
    Pool,
}

/// The partial key is taken from `PROXLOCK_PARTIAL_KEY`, or read from stdin.
#[derive(ClapArgs, Debug)]
pub struct ProxyArgs {
    /// Destination URL the proxy forwards to
    pub destination: Url,
    #[arg(long)]
    pub association_id: String,
    #[arg(long, short = 'X', default_value = "GET")]
    pub method: Method,
    /// Extra header as `Name: value`; repeatable
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,
    /// Request body
    #[arg(long, short = 'd')]
    pub data: Option<String>,
}

/// Everything a command needs: the backend client, the invalidation bus and the notice queue.
pub struct App {
    config: Config,
    api: Arc<ReqwestProxyApi>,
    bus: InvalidationBus,
    notices: Notices,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let tokens = auth::provider_from_config(&config)?;
        let api = Arc::new(ReqwestProxyApi::from_config(&config, tokens)?);
        let notices = Notices::from_config(&config.notices);
        Ok(Self {
            config,
            api,
            bus: InvalidationBus::new(),
            notices,
        })
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    /// Run one command. Failures end up in [`App::notices`]; returns whether it succeeded.
    pub async fn execute(&self, command: Command) -> bool {
        match self.dispatch(command).await {
            Ok(()) => true,
            Err(e) => {
                self.notices.push_error(&e);
                false
            }
        }
    }

    async fn dispatch(&self, command: Command) -> Result<()> {
        match command {
            Command::Me { register } => self.me(register).await,
            Command::Usage { watch } => self.usage(watch).await,
            Command::Projects(command) => self.projects(command).await,
            Command::Keys(command) => self.keys(command).await,
            Command::DeviceCheck(command) => self.device_check(command).await,
            Command::Proxy(args) => self.proxy(args).await,
        }
    }

    fn user_repository(&self) -> UserRepository {
        UserRepository::new(self.api.clone(), self.bus.clone())
    }

    fn projects_repository(&self) -> Arc<ProjectsRepository> {
        Arc::new(ProjectsRepository::new(self.api.clone(), self.bus.clone()))
    }

    fn page(&self, project: ProjectId) -> ProjectPage {
        ProjectPage::new(self.api.clone(), self.bus.clone(), project)
    }

    async fn me(&self, register: bool) -> Result<()> {
        let users = self.user_repository();
        if register {
            users.register().await?;
        } else {
            users.fetch().await;
        }
        let section = users.read();
        print!("{}", render_user(&section));
        self.print_banner(&section, false);
        Ok(())
    }

    /// The pricing view: counters in full, no banner
    async fn usage(&self, watch: bool) -> Result<()> {
        let users = Arc::new(self.user_repository());
        if !watch {
            print!("{}", render_usage(&users.fetch().await));
            return Ok(());
        }

        let mut updates = users.subscribe();
        let shutdown = CancellationToken::new();
        let poller = tokio::spawn(run_usage_poller(
            users.clone(),
            self.config.usage.refresh_interval,
            shutdown.clone(),
        ));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let section = updates.borrow_and_update().clone();
                    if !section.loading {
                        print!("{}", render_usage(&section));
                    }
                }
            }
        }
        shutdown.cancel();
        if let Err(e) = poller.await {
            warn!(error = %e, "Usage poller failed");
        }
        Ok(())
    }

    fn print_banner(&self, user: &Section<Option<User>>, on_pricing_view: bool) {
        let banner = user
            .data
            .as_ref()
            .and_then(|u| UsageBanner::evaluate(u, self.config.usage.low_usage_threshold, on_pricing_view));
        if let Some(banner) = banner {
            println!();
            println!("{}", banner.message());
        }
    }

    async fn projects(&self, command: ProjectsCommand) -> Result<()> {
        match command {
            ProjectsCommand::List => {
                let users = self.user_repository();
                let projects = self.projects_repository();
                let (list, user) = tokio::join!(projects.fetch(), users.fetch());
                print!("{}", render_projects(&list));
                self.print_banner(&user, false);
            }
            ProjectsCommand::Show { project } => {
                let users = self.user_repository();
                let page = self.page(project);
                let (_, user) = tokio::join!(page.load(), users.fetch());
                print!("{}", render_project_page(&page));
                self.print_banner(&user, false);
            }
            ProjectsCommand::Create { name, description } => {
                let projects = self.projects_repository();
                let form = ProjectForm::new(name.unwrap_or_default(), description);
                let created = projects.create_project(&form).await?;
                println!("Created project {} ({})", created.display_name(), created.id);
                println!();
                print!("{}", render_projects(&projects.read()));
            }
            ProjectsCommand::Update {
                project,
                name,
                description,
            } => {
                let page = self.page(project);
                let current = page.fetch_project().await;
                let Some(existing) = current.data else {
                    return Err(section_error("fetch project", current.error));
                };
                let mut form = ProjectForm::from_project(&existing);
                if let Some(name) = name {
                    form.name = name;
                }
                if let Some(description) = description {
                    form.description = description;
                }
                page.update_project(&form).await?;
                page.load().await;
                print!("{}", render_project_page(&page));
            }
            ProjectsCommand::Delete { project } => {
                // The sidebar list follows invalidations like it would in the dashboard
                let sidebar = self.projects_repository();
                sidebar.fetch().await;
                let list = sidebar.subscribe();

                let page = self.page(project);
                while_following(&sidebar, async {
                    page.delete_project().await?;
                    println!("Deleted project {project}");
                    wait_for_refresh(list, self.config.request_timeout).await;
                    Ok::<_, Error>(())
                })
                .await?;

                println!();
                print!("{}", render_projects(&sidebar.read()));
            }
        }
        Ok(())
    }

    async fn keys(&self, command: KeysCommand) -> Result<()> {
        match command {
            KeysCommand::List { project } => {
                let page = self.page(project);
                print!("{}", render_keys(&page.fetch_keys().await));
            }
            KeysCommand::Create {
                project,
                name,
                description,
                copy_with,
            } => {
                let api_key = secret_from_env_or_stdin(UPSTREAM_API_KEY_ENV, "Upstream API key: ").await?;
                let form = KeyForm::new(name.unwrap_or_default(), description.unwrap_or_default(), api_key);
                let page = self.page(project);
                let mut reveal = page.create_key(form).await?;

                let clipboard = copy_with.as_deref().map(CommandClipboard::parse).transpose()?;
                self.finish_reveal(&mut reveal, clipboard.as_ref().map(|c| c as &dyn Clipboard))
                    .await;
                println!();
                print!("{}", render_keys(&page.keys()));
            }
            KeysCommand::Update {
                project,
                key,
                name,
                description,
            } => {
                // Unset fields keep their current values
                let existing = self.api.get_key(project, key).await?;
                let page = self.page(project);
                let form = KeyEditForm::new(
                    name.or(existing.name).unwrap_or_default(),
                    description.or(existing.description).unwrap_or_default(),
                );
                page.update_key(key, &form).await?;
                print!("{}", render_keys(&page.keys()));
            }
            KeysCommand::Delete { project, key } => {
                let page = self.page(project);
                page.delete_key(key).await?;
                println!("Deleted key {key}");
                println!();
                print!("{}", render_keys(&page.keys()));
            }
        }
        Ok(())
    }

    /// Show the partial key once, then dismiss. A failed copy falls back to printing it.
    async fn finish_reveal(&self, reveal: &mut SecretReveal, clipboard: Option<&dyn Clipboard>) {
        if let Some(clipboard) = clipboard
            && reveal.state() == RevealState::Revealed
        {
            match reveal.copy_and_dismiss(clipboard).await {
                Ok(()) => {
                    println!("Partial key copied to the clipboard. It will not be shown again.");
                    return;
                }
                Err(e) => {
                    self.notices.push_error(&e);
                }
            }
        }
        print!("{}", render_reveal(reveal));
        reveal.dismiss();
    }

    async fn device_check(&self, command: DeviceCheckCommand) -> Result<()> {
        match command {
            DeviceCheckCommand::Show { project } => {
                let page = self.page(project);
                print!("{}", render_device_check(&page.fetch_device_check().await));
            }
            DeviceCheckCommand::Upload {
                project,
                team_id,
                key_id,
                private_key_file,
            } => {
                let private_key = tokio::fs::read_to_string(&private_key_file).await.map_err(|e| {
                    Error::Validation {
                        message: format!("Failed to read {}: {e}", private_key_file.display()),
                    }
                })?;
                let form = DeviceCheckForm::new(team_id, key_id, SecretString::from(private_key));
                let page = self.page(project);
                page.upload_device_check(form).await?;
                print!("{}", render_device_check(&page.device_check()));
            }
            DeviceCheckCommand::Link {
                project,
                team_id,
                key_id,
            } => {
                let pool = DeviceCheckPoolRepository::new(self.api.clone(), self.bus.clone());
                let section = pool.fetch().await;
                if let Some(message) = section.error {
                    return Err(Error::Validation { message });
                }
                let credential = pool.find(&team_id, &key_id).ok_or_else(|| Error::Validation {
                    message: format!("No DeviceCheck credential with team ID {team_id} and key ID {key_id} in your pool"),
                })?;
                let page = self.page(project);
                page.link_device_check(&credential).await?;
                print!("{}", render_device_check(&page.device_check()));
            }
            DeviceCheckCommand::Pool => {
                let pool = DeviceCheckPoolRepository::new(self.api.clone(), self.bus.clone());
                print!("{}", render_pool(&pool.fetch().await));
            }
        }
        Ok(())
    }

    async fn proxy(&self, args: ProxyArgs) -> Result<()> {
        let headers = args
            .headers
            .iter()
            .map(|header| parse_header(header))
            .collect::<Result<Vec<_>>>()?;
        let request = ProxiedRequest {
            partial_key: secret_from_env_or_stdin(PARTIAL_KEY_ENV, "Partial key: ").await?,
            association_id: args.association_id,
            destination: args.destination,
            method: args.method,
            headers,
            body: args.data,
        };
        let response = self.api.proxy(&request).await?;
        // The proxied call counts against the request limit
        self.bus.publish(Topic::User);
        print!("{}", render_proxied(&response));
        Ok(())
    }
}

/// Print the notices still visible, errors included, to stderr
pub fn print_notices(notices: &Notices) {
    for notice in notices.drain() {
        match notice.level {
            NoticeLevel::Error => eprintln!("error: {}", notice.message),
            NoticeLevel::Info => eprintln!("{}", notice.message),
        }
    }
}

fn section_error(operation: &str, error: Option<String>) -> Error {
    Error::Validation {
        message: error.unwrap_or_else(|| format!("Failed to {operation}")),
    }
}

/// Run `action` while `sidebar` follows invalidations. The refresh loop is stopped on every
/// path out, failures of `action` included.
async fn while_following<T>(
    sidebar: &Arc<ProjectsRepository>,
    action: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    let shutdown = CancellationToken::new();
    let refresh = sidebar.clone().run(shutdown.clone());
    let result = action.await;
    shutdown.cancel();
    if let Err(e) = refresh.await {
        warn!(error = %e, "Project list refresh task failed");
    }
    result
}

/// Wait until the watched section has been refetched, or give up after `timeout`
#[instrument(skip(receiver))]
async fn wait_for_refresh<T>(mut receiver: watch::Receiver<Section<T>>, timeout: Duration) {
    let settled = tokio::time::timeout(timeout, async {
        while receiver.changed().await.is_ok() {
            if !receiver.borrow_and_update().loading {
                return;
            }
        }
    })
    .await;
    if settled.is_err() {
        debug!("Refresh did not settle in time, showing the last known state");
    }
}

/// A secret from the environment, or from stdin when the variable is unset or empty. Secrets are
/// never taken from the command line, where other users can see them in the process list.
async fn secret_from_env_or_stdin(var: &str, prompt: &str) -> Result<SecretString> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretString::from(value.trim().to_string())),
        _ => read_secret_line(prompt).await,
    }
}

async fn read_secret_line(prompt: &str) -> Result<SecretString> {
    eprint!("{prompt}");
    let mut line = String::new();
    tokio::io::BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .map_err(|e| Error::Validation {
            message: format!("Failed to read from stdin: {e}"),
        })?;
    Ok(SecretString::from(line.trim().to_string()))
}

fn parse_header(header: &str) -> Result<(String, String)> {
    let (name, value) = header.split_once(':').ok_or_else(|| Error::Validation {
        message: format!("Header must look like `Name: value` (got {header:?})"),
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation {
            message: format!("Header name cannot be empty (got {header:?})"),
        });
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

pub fn render_user(section: &Section<Option<User>>) -> String {
    if let Some(error) = &section.error {
        return format!("User: {error}\n");
    }
    match &section.data {
        Some(user) => {
            let mut out = format!("{} ({})\n", user.display_name(), user.id);
            out.push_str(&format!(
                "Plan: {}\n",
                if user.is_subscribed { "subscribed" } else { "free" }
            ));
            out
        }
        None => "Not registered. Run `proxlock me --register`.\n".to_string(),
    }
}

pub fn render_usage(section: &Section<Option<User>>) -> String {
    if let Some(error) = &section.error {
        return format!("Usage: {error}\n");
    }
    let Some(user) = &section.data else {
        return "Usage: unknown\n".to_string();
    };
    match (user.current_request_usage, user.request_limit) {
        (Some(usage), Some(limit)) => format!("Requests: {usage} / {limit}\n"),
        (Some(usage), None) => format!("Requests: {usage} (no limit)\n"),
        _ => "Requests: unknown\n".to_string(),
    }
}

pub fn render_projects(section: &Section<Vec<Project>>) -> String {
    if let Some(error) = &section.error {
        return format!("Projects: {error}\n");
    }
    if section.data.is_empty() {
        return "No projects yet. Create one with `proxlock projects create`.\n".to_string();
    }
    let mut out = format!("Projects ({})\n", section.data.len());
    for project in &section.data {
        out.push_str(&format!(
            "  {}  {}  [{}]\n      {}\n",
            project.id,
            project.display_name(),
            plural(project.key_count(), "key"),
            project.display_description()
        ));
    }
    out
}

pub fn render_keys(section: &Section<Vec<ApiKey>>) -> String {
    if let Some(error) = &section.error {
        return format!("Keys: {error}\n");
    }
    if section.data.is_empty() {
        return "Keys: none\n".to_string();
    }
    let mut out = format!("Keys ({})\n", section.data.len());
    for key in &section.data {
        out.push_str(&format!("  {}  {}\n", key.id, key.display_name()));
        if let Some(association_id) = &key.association_id {
            out.push_str(&format!("      association: {association_id}\n"));
        }
        if let Some(description) = key.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&format!("      {description}\n"));
        }
    }
    out
}

pub fn render_device_check(section: &Section<Option<DeviceCheckCredential>>) -> String {
    if let Some(error) = &section.error {
        return format!("DeviceCheck: {error}\n");
    }
    match &section.data {
        Some(credential) => render_credential("DeviceCheck", credential),
        None => "DeviceCheck: not configured\n".to_string(),
    }
}

fn render_credential(title: &str, credential: &DeviceCheckCredential) -> String {
    let mut out = format!("{title}: team {}  key {}\n", credential.team_id, credential.key_id);
    if let Some(bypass) = &credential.bypass_token {
        out.push_str(&format!("  bypass token: {bypass}\n"));
    }
    out
}

pub fn render_pool(section: &Section<Vec<DeviceCheckCredential>>) -> String {
    if let Some(error) = &section.error {
        return format!("DeviceCheck pool: {error}\n");
    }
    if section.data.is_empty() {
        return "DeviceCheck pool: empty\n".to_string();
    }
    section
        .data
        .iter()
        .map(|credential| render_credential("Credential", credential))
        .collect()
}

pub fn render_project_page(page: &ProjectPage) -> String {
    let project = page.project();
    let mut out = match (&project.error, &project.data) {
        (Some(error), _) => format!("Project: {error}\n"),
        (None, Some(project)) => format!(
            "Project: {} ({})\n{}\n",
            project.display_name(),
            project.id,
            project.display_description()
        ),
        (None, None) => format!("Project: {} not loaded\n", page.project_id()),
    };
    out.push('\n');
    out.push_str(&render_keys(&page.keys()));
    out.push('\n');
    out.push_str(&render_device_check(&page.device_check()));
    out
}

/// The one-time view of a created key
pub fn render_reveal(reveal: &SecretReveal) -> String {
    let mut out = String::new();
    if let Some(key) = reveal.key() {
        out.push_str(&format!("Created key {} ({})\n", key.display_name(), key.id));
        if let Some(association_id) = &key.association_id {
            out.push_str(&format!("Association ID: {association_id}\n"));
        }
    }
    match (reveal.secret(), reveal.placeholder()) {
        (Some(secret), Some(placeholder)) => {
            out.push_str(&format!("Partial key: {}\n", secret.expose_secret()));
            out.push_str(&format!("Use it in proxied requests as: {placeholder}\n"));
            out.push_str("Store it now. It will not be shown again.\n");
        }
        _ => out.push_str("No partial key was returned for this key.\n"),
    }
    out
}

pub fn render_proxied(response: &ProxiedResponse) -> String {
    let mut out = format!("HTTP {}\n", response.status);
    out.push_str(&response.body);
    if !response.body.ends_with('\n') {
        out.push('\n');
    }
    out
}
