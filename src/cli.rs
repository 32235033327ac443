//! Command-line pages.
//!
//! Every command is a page load: the route guard runs for the command's page
//! first, and the handler only executes when the guard lets it through.
//! Failed backend calls go through the context's error classifier.

use crate::api::{ApiError, CancelToken, RequestOptions};
use crate::app::AppContext;
use crate::auth::{AuthState, LoginOutcome};
use crate::classify::Remedy;
use crate::model::{
    AttendanceFilters, AttendanceMethod, AttendanceRecord, AttendanceStatus, MarkAttendance,
    NewUser, Role, UserProfile, UserUpdate,
};
use crate::routes::{self, GuardDecision, LANDING_PAGE};
use crate::scan::{scans, LineScanSource, ScanSource};
use crate::transport::{Body, Method};
use anyhow::{Context as _, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde::Serialize;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Log in to a role's section
    Login {
        #[arg(long)]
        role: Role,
        #[arg(long)]
        user_id: String,
        #[arg(long, env = "ATTEND_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Clear the saved session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Account password
    Password {
        #[command(subcommand)]
        action: PasswordCommand,
    },
    /// Administration pages
    Admin {
        #[command(subcommand)]
        action: AdminCommand,
    },
    /// Lecturer pages
    Lecturer {
        #[command(subcommand)]
        action: LecturerCommand,
    },
    /// Examiner pages
    Examiner {
        #[command(subcommand)]
        action: ExaminerCommand,
    },
    /// Student pages
    Student {
        #[command(subcommand)]
        action: StudentCommand,
    },
    /// Send a request with the saved token and print the raw response
    Request {
        #[arg(value_parser = parse_http_method)]
        method: Method,
        /// Endpoint path, e.g. /get_users
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
    /// Interactive shell; each line is one command
    Shell,
}

#[derive(Subcommand, Debug, Clone)]
pub enum PasswordCommand {
    Change {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AdminCommand {
    /// System-wide counts
    Stats,
    Users {
        #[command(subcommand)]
        action: UsersCommand,
    },
    Face {
        #[command(subcommand)]
        action: FaceCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum UsersCommand {
    List {
        #[arg(long)]
        role: Option<Role>,
    },
    Get {
        user_id: String,
    },
    Create(CreateUserArgs),
    Update(UpdateUserArgs),
    Delete {
        user_id: String,
    },
    /// Bulk-create users from a CSV file
    Import {
        file: PathBuf,
        #[arg(long, default_value = "student")]
        default_role: Role,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct CreateUserArgs {
    #[arg(long)]
    pub user_id: String,
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub email: String,
    #[arg(long)]
    pub role: Role,
    #[arg(long)]
    pub password: String,
    #[arg(long)]
    pub level: Option<i64>,
    #[arg(long)]
    pub program: Option<String>,
    #[arg(long)]
    pub department: Option<String>,
    #[arg(long = "course", value_delimiter = ',')]
    pub courses: Vec<String>,
    #[arg(long = "levels", value_delimiter = ',')]
    pub levels: Vec<i64>,
}

impl CreateUserArgs {
    fn to_new_user(&self) -> NewUser {
        NewUser {
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            password: self.password.clone(),
            level: self.level,
            program: self.program.clone(),
            department: self.department.clone(),
            courses: non_empty(&self.courses),
            levels: non_empty(&self.levels),
        }
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct UpdateUserArgs {
    pub user_id: String,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub role: Option<Role>,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long)]
    pub level: Option<i64>,
    #[arg(long)]
    pub program: Option<String>,
    #[arg(long)]
    pub department: Option<String>,
    #[arg(long = "course", value_delimiter = ',')]
    pub courses: Vec<String>,
    #[arg(long = "levels", value_delimiter = ',')]
    pub levels: Vec<i64>,
}

impl UpdateUserArgs {
    fn to_update(&self) -> UserUpdate {
        UserUpdate {
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            password: self.password.clone(),
            level: self.level,
            program: self.program.clone(),
            department: self.department.clone(),
            courses: non_empty(&self.courses),
            levels: non_empty(&self.levels),
        }
    }
}

fn non_empty<T: Clone>(values: &[T]) -> Option<Vec<T>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum FaceCommand {
    /// Register a face encoding (a JSON array of numbers) for a student
    Register {
        #[arg(long)]
        student: String,
        #[arg(long)]
        encoding: PathBuf,
    },
    /// Retrain the recognition model
    Train,
}

#[derive(Subcommand, Debug, Clone)]
pub enum LecturerCommand {
    Dashboard,
    /// Attendance for the lecturer's courses
    Attendance,
    /// Mark one student
    Mark {
        #[arg(long)]
        student: String,
        #[arg(long)]
        course: String,
        #[arg(long, default_value = "manual", value_parser = parse_method)]
        method: AttendanceMethod,
        #[arg(long, default_value = "present", value_parser = parse_status)]
        status: AttendanceStatus,
    },
    /// Search attendance records
    Records(RecordFilters),
    /// Mark scanned IDs present, one per line, until EOF or `done`
    Scan {
        #[arg(long)]
        course: String,
        /// Read scans from a file instead of stdin
        #[arg(long)]
        from: Option<PathBuf>,
        /// Stop accepting scans after this many minutes
        #[arg(long, value_name = "MINUTES")]
        expires_in: Option<u64>,
        /// Give up on a single mark after this long
        #[arg(long, value_name = "MS")]
        mark_timeout_ms: Option<u64>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ExaminerCommand {
    Records(RecordFilters),
}

#[derive(Subcommand, Debug, Clone)]
pub enum StudentCommand {
    Dashboard,
    Attendance,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct RecordFilters {
    #[arg(long)]
    pub course: Option<String>,
    /// Day as YYYY-MM-DD
    #[arg(long)]
    pub date: Option<NaiveDate>,
    #[arg(long)]
    pub student: Option<String>,
}

impl RecordFilters {
    fn to_filters(&self) -> AttendanceFilters {
        let mut filters = AttendanceFilters::new();
        if let Some(course) = &self.course {
            filters = filters.course_id(course.clone());
        }
        if let Some(date) = self.date {
            filters = filters.date(date);
        }
        if let Some(student) = &self.student {
            filters = filters.student_id(student.clone());
        }
        filters
    }
}

fn parse_method(s: &str) -> Result<AttendanceMethod, String> {
    AttendanceMethod::from_str(s)
        .ok_or_else(|| format!("unknown method '{}', expected manual, qr or face", s))
}

fn parse_status(s: &str) -> Result<AttendanceStatus, String> {
    AttendanceStatus::from_str(s)
        .ok_or_else(|| format!("unknown status '{}', expected present, absent or late", s))
}

fn parse_http_method(s: &str) -> Result<Method, String> {
    Method::from_str(s)
        .ok_or_else(|| format!("unknown method '{}', expected get, post, put or delete", s))
}

/// The command that opens a role's own section
fn entry_command(role: Role) -> &'static str {
    match role {
        Role::Admin => "attend admin stats",
        Role::Lecturer => "attend lecturer dashboard",
        Role::Examiner => "attend examiner records",
        Role::Student => "attend student dashboard",
    }
}

impl Command {
    /// The page this command loads
    pub fn page(&self) -> String {
        match self {
            Command::Login { role, .. } => routes::login_page(*role),
            Command::Logout
            | Command::Whoami
            | Command::Password { .. }
            | Command::Request { .. }
            | Command::Shell => LANDING_PAGE.to_string(),
            Command::Admin { action } => match action {
                AdminCommand::Stats => "admin/index.html".to_string(),
                AdminCommand::Users { .. } => "admin/users.html".to_string(),
                AdminCommand::Face { .. } => "admin/face.html".to_string(),
            },
            Command::Lecturer { action } => match action {
                LecturerCommand::Dashboard => "lecturer/index.html".to_string(),
                LecturerCommand::Attendance
                | LecturerCommand::Mark { .. }
                | LecturerCommand::Records(_) => "lecturer/attendance.html".to_string(),
                LecturerCommand::Scan { .. } => "lecturer/scan.html".to_string(),
            },
            Command::Examiner { action } => match action {
                ExaminerCommand::Records(_) => "examiner/attendance.html".to_string(),
            },
            Command::Student { action } => match action {
                StudentCommand::Dashboard => "student/index.html".to_string(),
                StudentCommand::Attendance => "student/attendance.html".to_string(),
            },
        }
    }
}

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// The route guard sent the user elsewhere
    Redirected,
    Failed,
}

impl Outcome {
    pub fn exit_code(self) -> ExitCode {
        match self {
            Outcome::Done => ExitCode::SUCCESS,
            Outcome::Failed => ExitCode::FAILURE,
            Outcome::Redirected => ExitCode::from(2),
        }
    }
}

/// Writes results as tables or, with `--json`, as pretty JSON
pub struct Printer {
    as_json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { as_json: json }
    }

    fn json<T: Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn message(&self, message: Option<&str>, fallback: &str) {
        println!("{}", message.unwrap_or(fallback));
    }

    fn users(&self, users: &[UserProfile]) {
        if users.is_empty() {
            println!("No users found");
            return;
        }
        println!("{:<12} {:<24} {:<30} ROLE", "ID", "NAME", "EMAIL");
        for user in users {
            println!(
                "{:<12} {:<24} {:<30} {}",
                user.user_id, user.name, user.email, user.role
            );
        }
    }

    fn user(&self, user: &UserProfile) {
        println!("{} ({})", user.name, user.user_id);
        println!("  role:  {}", user.role.title());
        println!("  email: {}", user.email);
        if let Some(level) = user.level {
            println!("  level: {}", level);
        }
        if let Some(program) = &user.program {
            println!("  program: {}", program);
        }
        if let Some(department) = &user.department {
            println!("  department: {}", department);
        }
        if let Some(courses) = &user.courses {
            println!("  courses: {}", courses.join(", "));
        }
    }

    fn attendance(&self, records: &[AttendanceRecord]) {
        if records.is_empty() {
            println!("No attendance records found");
            return;
        }
        println!(
            "{:<12} {:<10} {:<12} {:<10} METHOD",
            "DATE", "COURSE", "STUDENT", "STATUS"
        );
        for r in records {
            let course = r.course_id.as_deref().or(r.course.as_deref());
            println!(
                "{:<12} {:<10} {:<12} {:<10} {}",
                r.date.as_deref().unwrap_or("-"),
                course.unwrap_or("-"),
                r.student_id.as_deref().unwrap_or("-"),
                r.status.as_deref().unwrap_or("-"),
                r.method.as_deref().unwrap_or("-"),
            );
        }
    }
}

/// Load the command's page, then run it if the guard allows
pub fn run_command(ctx: &AppContext, command: &Command, printer: &Printer) -> Result<Outcome> {
    let page = command.page();
    if let GuardDecision::Redirect(_) = ctx.enter(&page) {
        explain_redirect(ctx, &page);
        return Ok(Outcome::Redirected);
    }
    debug!(%page, "page loaded");

    match command {
        Command::Login {
            role,
            user_id,
            password,
        } => login(ctx, *role, user_id, password),
        Command::Logout => {
            ctx.auth.logout();
            println!("Logged out");
            Ok(Outcome::Done)
        }
        Command::Whoami => whoami(ctx, printer),
        Command::Password { action } => match action {
            PasswordCommand::Change { old, new } => change_password(ctx, old, new, printer),
        },
        Command::Admin { action } => admin(ctx, action, printer),
        Command::Lecturer { action } => lecturer(ctx, action, printer),
        Command::Examiner { action } => match action {
            ExaminerCommand::Records(filters) => records(ctx, filters, printer),
        },
        Command::Student { action } => student(ctx, action, printer),
        Command::Request { method, path, data } => {
            raw_request(ctx, *method, path, data.as_deref(), printer)
        }
        Command::Shell => {
            eprintln!("Already in the shell");
            Ok(Outcome::Failed)
        }
    }
}

/// Tell the user why the guard moved them and what to run instead
fn explain_redirect(ctx: &AppContext, page: &str) {
    let target = ctx
        .navigator
        .location()
        .unwrap_or_else(|| LANDING_PAGE.to_string());
    match (ctx.auth.user(), routes::section_of(page)) {
        (None, _) => {
            let role = routes::section_of(&target).map(|r| r.as_str()).unwrap_or("<role>");
            eprintln!(
                "Not logged in. Run `attend login --role {} --user-id <ID>` first.",
                role
            );
        }
        (Some(user), _) if routes::is_login_page(page) => {
            eprintln!(
                "Already logged in as {} ({}). Next: `{}`. Run `attend logout` to switch accounts.",
                user.user_id,
                user.role,
                entry_command(user.role)
            );
        }
        (Some(user), Some(section)) if !ctx.auth.has_role(section) => {
            eprintln!(
                "{} pages are not available to {} accounts.",
                section.title(),
                user.role.as_str()
            );
        }
        (Some(_), _) => eprintln!("Redirected to {}", target),
    }
}

/// Unwrap a call result, routing a failure through the classifier
fn settle<T>(ctx: &AppContext, context: &str, result: Result<T, ApiError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            let remedy = ctx.report(&err, context);
            eprintln!("{}", remedy.message());
            None
        }
    }
}

fn login(ctx: &AppContext, role: Role, user_id: &str, password: &str) -> Result<Outcome> {
    match ctx.auth.login(user_id, password, role) {
        LoginOutcome::Success(user) => {
            println!("Logged in as {} ({})", user.name, user.role.title());
            println!("Next: `{}`", entry_command(user.role));
            Ok(Outcome::Done)
        }
        LoginOutcome::Failure(message) => {
            eprintln!("Login failed: {}", message);
            Ok(Outcome::Failed)
        }
    }
}

fn whoami(ctx: &AppContext, printer: &Printer) -> Result<Outcome> {
    // Resolved by the page load that ran before this handler
    let AuthState::Authenticated(user) = ctx.auth.state() else {
        println!("Not logged in");
        return Ok(Outcome::Done);
    };
    if printer.as_json {
        printer.json(&user)?;
    } else {
        printer.user(&user);
    }
    Ok(Outcome::Done)
}

fn change_password(ctx: &AppContext, old: &str, new: &str, printer: &Printer) -> Result<Outcome> {
    if !ctx.auth.is_authenticated() {
        eprintln!("Not logged in");
        return Ok(Outcome::Failed);
    }
    let Some(resp) = settle(ctx, "changing password", ctx.api.change_password(old, new)) else {
        return Ok(Outcome::Failed);
    };
    printer.message(resp.message.as_deref(), "Password changed");
    Ok(Outcome::Done)
}

fn raw_request(
    ctx: &AppContext,
    method: Method,
    path: &str,
    data: Option<&str>,
    printer: &Printer,
) -> Result<Outcome> {
    let body = match data {
        Some(raw) => Body::Json(serde_json::from_str(raw).context("--data is not valid JSON")?),
        None => Body::Empty,
    };
    let endpoint = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    let options = RequestOptions {
        method,
        body,
        ..RequestOptions::default()
    };
    let Some(resp) = settle(
        ctx,
        "sending request",
        ctx.auth.authenticated_request(&ctx.api.url_for(&endpoint), options),
    ) else {
        return Ok(Outcome::Failed);
    };

    let parsed: Option<serde_json::Value> = serde_json::from_str(&resp.body).ok();
    match parsed {
        Some(value) if printer.as_json => printer.json(&value)?,
        _ => {
            println!("HTTP {}", resp.status);
            println!("{}", resp.body);
        }
    }
    Ok(if resp.is_success() {
        Outcome::Done
    } else {
        Outcome::Failed
    })
}

fn admin(ctx: &AppContext, action: &AdminCommand, printer: &Printer) -> Result<Outcome> {
    match action {
        AdminCommand::Stats => {
            let Some(resp) = settle(ctx, "loading dashboard data", ctx.api.get_dashboard_stats())
            else {
                return Ok(Outcome::Failed);
            };
            if printer.as_json {
                printer.json(&resp)?;
            } else {
                for (key, value) in &resp.payload.stats {
                    println!("{}: {}", key, value);
                }
            }
        }
        AdminCommand::Users { action } => return users(ctx, action, printer),
        AdminCommand::Face { action } => match action {
            FaceCommand::Register { student, encoding } => {
                let raw = std::fs::read_to_string(encoding)
                    .with_context(|| format!("failed to read {}", encoding.display()))?;
                let values: Vec<f64> = serde_json::from_str(&raw).with_context(|| {
                    format!("{} is not a JSON array of numbers", encoding.display())
                })?;
                let Some(resp) =
                    settle(ctx, "registering face", ctx.api.register_face(student, &values))
                else {
                    return Ok(Outcome::Failed);
                };
                printer.message(resp.message.as_deref(), "Face registered");
            }
            FaceCommand::Train => {
                let Some(resp) = settle(ctx, "training model", ctx.api.train_model()) else {
                    return Ok(Outcome::Failed);
                };
                printer.message(resp.message.as_deref(), "Model trained");
            }
        },
    }
    Ok(Outcome::Done)
}

fn users(ctx: &AppContext, action: &UsersCommand, printer: &Printer) -> Result<Outcome> {
    match action {
        UsersCommand::List { role } => {
            let result = match role {
                Some(role) => settle(ctx, "filtering users", ctx.api.get_users_by_role(*role)),
                None => settle(ctx, "loading users", ctx.api.get_all_users()),
            };
            let Some(resp) = result else {
                return Ok(Outcome::Failed);
            };
            if printer.as_json {
                printer.json(&resp)?;
            } else {
                printer.users(&resp.payload.users);
            }
        }
        UsersCommand::Get { user_id } => {
            let Some(resp) = settle(ctx, "loading user details", ctx.api.get_user(user_id)) else {
                return Ok(Outcome::Failed);
            };
            if printer.as_json {
                printer.json(&resp)?;
            } else {
                printer.user(&resp.payload.user);
            }
        }
        UsersCommand::Create(args) => {
            let Some(resp) = settle(ctx, "adding user", ctx.api.create_user(&args.to_new_user()))
            else {
                return Ok(Outcome::Failed);
            };
            printer.message(resp.message.as_deref(), "User created");
        }
        UsersCommand::Update(args) => {
            let update = args.to_update();
            if update.is_empty() {
                eprintln!("Nothing to update for {}", args.user_id);
                return Ok(Outcome::Failed);
            }
            let Some(resp) =
                settle(ctx, "updating user", ctx.api.update_user(&args.user_id, &update))
            else {
                return Ok(Outcome::Failed);
            };
            printer.message(resp.message.as_deref(), "User updated");
        }
        UsersCommand::Delete { user_id } => {
            let Some(resp) = settle(ctx, "deleting user", ctx.api.delete_user(user_id)) else {
                return Ok(Outcome::Failed);
            };
            printer.message(resp.message.as_deref(), "User deleted");
        }
        UsersCommand::Import { file, default_role } => {
            match ctx.api.bulk_upload_file(file, *default_role) {
                Ok(resp) => {
                    if printer.as_json {
                        printer.json(&resp)?;
                    } else {
                        printer.message(resp.message.as_deref(), "Users uploaded");
                    }
                }
                Err(err) => match err.downcast_ref::<ApiError>() {
                    Some(api_err) => {
                        eprintln!("{}", ctx.report(api_err, "uploading users").message());
                        return Ok(Outcome::Failed);
                    }
                    None => return Err(err),
                },
            }
        }
    }
    Ok(Outcome::Done)
}

fn lecturer(ctx: &AppContext, action: &LecturerCommand, printer: &Printer) -> Result<Outcome> {
    match action {
        LecturerCommand::Dashboard => {
            let Some(resp) =
                settle(ctx, "loading dashboard data", ctx.api.get_lecturer_dashboard())
            else {
                return Ok(Outcome::Failed);
            };
            printer.json(&resp.payload.data)?;
        }
        LecturerCommand::Attendance => {
            let Some(resp) = settle(ctx, "loading attendance", ctx.api.get_lecturer_attendance())
            else {
                return Ok(Outcome::Failed);
            };
            if printer.as_json {
                printer.json(&resp)?;
            } else {
                printer.attendance(&resp.payload.attendance);
            }
        }
        LecturerCommand::Mark {
            student,
            course,
            method,
            status,
        } => {
            let mark = MarkAttendance {
                student_id: student.clone(),
                course_id: course.clone(),
                method: *method,
                status: *status,
            };
            let Some(resp) = settle(ctx, "marking attendance", ctx.api.mark_attendance(&mark))
            else {
                return Ok(Outcome::Failed);
            };
            printer.message(resp.message.as_deref(), "Attendance marked");
        }
        LecturerCommand::Records(filters) => return records(ctx, filters, printer),
        LecturerCommand::Scan {
            course,
            from,
            expires_in,
            mark_timeout_ms,
        } => {
            let window = ScanWindow::open(
                expires_in.map(|minutes| Duration::from_secs(minutes * 60)),
                mark_timeout_ms.map(Duration::from_millis),
            );
            return match from {
                Some(path) => {
                    let file = std::fs::File::open(path)
                        .with_context(|| format!("failed to open {}", path.display()))?;
                    let mut source = LineScanSource::new(BufReader::new(file));
                    run_scan(ctx, course, &mut source, &window)
                }
                None => {
                    match expires_in {
                        Some(minutes) => eprintln!(
                            "Scanning for {} for {} minutes. One ID per line, `done` to finish.",
                            course, minutes
                        ),
                        None => eprintln!(
                            "Scanning for {}. One ID per line, `done` to finish.",
                            course
                        ),
                    }
                    let stdin = std::io::stdin();
                    run_scan(ctx, course, &mut LineScanSource::new(stdin.lock()), &window)
                }
            };
        }
    }
    Ok(Outcome::Done)
}

fn records(ctx: &AppContext, filters: &RecordFilters, printer: &Printer) -> Result<Outcome> {
    let Some(resp) = settle(
        ctx,
        "loading attendance",
        ctx.api.get_attendance(&filters.to_filters()),
    ) else {
        return Ok(Outcome::Failed);
    };
    if printer.as_json {
        printer.json(&resp)?;
    } else {
        printer.attendance(&resp.payload.attendance);
    }
    Ok(Outcome::Done)
}

fn student(ctx: &AppContext, action: &StudentCommand, printer: &Printer) -> Result<Outcome> {
    match action {
        StudentCommand::Dashboard => {
            let Some(resp) =
                settle(ctx, "loading dashboard data", ctx.api.get_student_dashboard())
            else {
                return Ok(Outcome::Failed);
            };
            printer.json(&resp.payload.data)?;
        }
        StudentCommand::Attendance => {
            let Some(resp) = settle(ctx, "loading attendance", ctx.api.get_student_attendance())
            else {
                return Ok(Outcome::Failed);
            };
            if printer.as_json {
                printer.json(&resp)?;
            } else {
                printer.attendance(&resp.payload.attendance);
            }
        }
    }
    Ok(Outcome::Done)
}

/// Limits on a scanning session: how long scans are accepted and how long a
/// single mark may take
#[derive(Debug, Clone, Default)]
pub struct ScanWindow {
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
}

impl ScanWindow {
    /// A window that closes by itself once `expires_in` has passed
    pub fn open(expires_in: Option<Duration>, timeout: Option<Duration>) -> Self {
        let cancel = CancelToken::new();
        if let Some(after) = expires_in {
            close_after(cancel.clone(), after);
        }
        Self { timeout, cancel }
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn request_options(&self) -> RequestOptions {
        let options = RequestOptions::default().cancel_with(self.cancel.clone());
        match self.timeout {
            Some(timeout) => options.timeout(timeout),
            None => options,
        }
    }
}

fn close_after(token: CancelToken, after: Duration) {
    std::thread::spawn(move || {
        std::thread::sleep(after);
        token.cancel();
    });
}

/// Mark every scanned ID present by QR. Stops early if the session is
/// rejected, since every later mark would fail the same way, or once the
/// window closes.
pub fn run_scan<S: ScanSource>(
    ctx: &AppContext,
    course: &str,
    source: &mut S,
    window: &ScanWindow,
) -> Result<Outcome> {
    let mut marked = 0;
    let mut failed = 0;
    for scan in scans(source) {
        let student_id = scan.context("failed to read scan")?;
        if window.is_closed() {
            info!(course, "scan window closed");
            println!("Scan window closed, {} not marked", student_id);
            break;
        }
        let mark = MarkAttendance {
            method: AttendanceMethod::Qr,
            ..MarkAttendance::present(&student_id, course)
        };
        match ctx.api.mark_attendance_with(&mark, window.request_options()) {
            Ok(_) => {
                marked += 1;
                println!("{} present", student_id);
            }
            // The mark may or may not have landed
            Err(ApiError::Cancelled) => {
                failed += 1;
                eprintln!("{}: scan window closed before the mark was confirmed", student_id);
                break;
            }
            Err(err) => {
                failed += 1;
                let remedy = ctx.report(&err, "marking attendance");
                eprintln!("{}: {}", student_id, remedy.message());
                if remedy == Remedy::ForcedLogout {
                    break;
                }
            }
        }
    }
    println!("{} marked, {} failed", marked, failed);
    Ok(if failed == 0 {
        Outcome::Done
    } else {
        Outcome::Failed
    })
}

/// One shell line
#[derive(Parser, Debug)]
#[command(name = "attend", no_binary_name = true)]
struct ShellLine {
    #[command(subcommand)]
    command: Command,
}

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".attend").join("history"))
}

pub fn run_shell(ctx: &AppContext, printer: &Printer) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history = history_path();
    if let Some(path) = &history {
        // Missing on first run
        let _ = rl.load_history(path);
    }

    println!(
        "attend ({}) - type help for commands, exit to quit",
        ctx.config.api.base_url
    );

    loop {
        let prompt = match ctx.session.user() {
            Some(user) => format!("{}@{}> ", user.user_id, user.role),
            None => "attend> ".to_string(),
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;
                if line == "exit" || line == "quit" {
                    break;
                }

                let words = match shell_words::split(line) {
                    Ok(words) => words,
                    Err(e) => {
                        eprintln!("Parse error: {}", e);
                        continue;
                    }
                };
                match ShellLine::try_parse_from(words) {
                    Ok(parsed) => {
                        if let Err(e) = run_command(ctx, &parsed.command, printer) {
                            eprintln!("Error: {:#}", e);
                        }
                    }
                    Err(e) => {
                        let _ = e.print();
                    }
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        if let Err(e) = rl.save_history(path) {
            debug!(error = %e, "could not save shell history");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{profile, test_context, FakeTransport};
    use serde_json::json;
    use std::io::Cursor;

    fn parse(line: &str) -> Command {
        let words = shell_words::split(line).unwrap();
        ShellLine::try_parse_from(words).unwrap().command
    }

    fn logged_in(transport: &FakeTransport, role: Role) -> AppContext {
        let ctx = test_context(transport);
        ctx.session.save("tok", &profile("U1", role)).unwrap();
        ctx
    }

    #[test]
    fn test_commands_map_to_pages() {
        let cases = [
            ("login --role admin --user-id a --password p", "admin/login.html"),
            ("whoami", "index.html"),
            ("admin stats", "admin/index.html"),
            ("admin users list --role lecturer", "admin/users.html"),
            ("admin users delete S001", "admin/users.html"),
            ("admin face train", "admin/face.html"),
            ("lecturer mark --student S1 --course CS101", "lecturer/attendance.html"),
            ("lecturer scan --course CS101", "lecturer/scan.html"),
            ("examiner records --course CS101", "examiner/attendance.html"),
            ("student dashboard", "student/index.html"),
            ("student attendance", "student/attendance.html"),
            ("request get /get_users", "index.html"),
        ];
        for (line, page) in cases {
            assert_eq!(parse(line).page(), page, "{}", line);
        }
    }

    #[test]
    fn test_parse_values() {
        match parse("lecturer mark --student S1 --course CS101 --method qr --status late") {
            Command::Lecturer {
                action:
                    LecturerCommand::Mark {
                        method, status, ..
                    },
            } => {
                assert_eq!(method, AttendanceMethod::Qr);
                assert_eq!(status, AttendanceStatus::Late);
            }
            other => panic!("unexpected {:?}", other),
        }

        match parse("lecturer records --course CS101 --date 2024-01-01") {
            Command::Lecturer {
                action: LecturerCommand::Records(filters),
            } => {
                let endpoint = crate::api::attendance_endpoint(&filters.to_filters());
                assert_eq!(endpoint, "/get_attendance?course_id=CS101&date=2024-01-01");
            }
            other => panic!("unexpected {:?}", other),
        }

        let words = shell_words::split("admin users list --role janitor").unwrap();
        assert!(ShellLine::try_parse_from(words).is_err());
    }

    #[test]
    fn test_create_user_args_drop_empty_lists() {
        let Command::Admin {
            action:
                AdminCommand::Users {
                    action: UsersCommand::Create(args),
                },
        } = parse(
            "admin users create --user-id L1 --name 'Dr Ada' --email a@x --role lecturer \
             --password pw --course CS101,CS102",
        )
        else {
            panic!("expected create");
        };
        let user = args.to_new_user();
        assert_eq!(user.name, "Dr Ada");
        assert_eq!(
            user.courses,
            Some(vec!["CS101".to_string(), "CS102".to_string()])
        );
        assert_eq!(user.levels, None);
    }

    #[test]
    fn test_guarded_command_without_session_sends_nothing() {
        let transport = FakeTransport::new();
        let ctx = test_context(&transport);
        let outcome = run_command(&ctx, &parse("admin users list"), &Printer::new(false)).unwrap();
        assert_eq!(outcome, Outcome::Redirected);
        assert!(transport.requests().is_empty());
        assert_eq!(ctx.navigator.location().as_deref(), Some("admin/login.html"));
    }

    #[test]
    fn test_wrong_section_is_redirected_to_landing() {
        let transport = FakeTransport::new();
        let ctx = logged_in(&transport, Role::Student);
        let outcome = run_command(&ctx, &parse("admin stats"), &Printer::new(false)).unwrap();
        assert_eq!(outcome, Outcome::Redirected);
        assert_eq!(ctx.navigator.location().as_deref(), Some(LANDING_PAGE));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_expired_session_during_command_logs_out() {
        let transport = FakeTransport::new();
        let ctx = logged_in(&transport, Role::Admin);
        transport.push_json(401, json!({"status": "error", "message": "Token has expired"}));

        let outcome = run_command(&ctx, &parse("admin users list"), &Printer::new(false)).unwrap();
        assert_eq!(outcome, Outcome::Failed);
        assert!(!ctx.session.load().is_authenticated());
    }

    #[test]
    fn test_update_without_fields_is_rejected_locally() {
        let transport = FakeTransport::new();
        let ctx = logged_in(&transport, Role::Admin);
        let outcome =
            run_command(&ctx, &parse("admin users update S001"), &Printer::new(false)).unwrap();
        assert_eq!(outcome, Outcome::Failed);
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_scan_marks_each_id_by_qr() {
        let transport = FakeTransport::new();
        let ctx = logged_in(&transport, Role::Lecturer);
        transport.push_json(200, json!({"status": "success", "message": "ok"}));
        transport.push_json(400, json!({"status": "error", "message": "Student not enrolled"}));

        let mut source = LineScanSource::new(Cursor::new("S001\nS999\ndone\nS002\n"));
        let outcome = run_scan(&ctx, "CS101", &mut source, &ScanWindow::default()).unwrap();
        assert_eq!(outcome, Outcome::Failed);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        match &requests[0].body {
            crate::transport::Body::Json(body) => {
                assert_eq!(body["student_id"], "S001");
                assert_eq!(body["course_id"], "CS101");
                assert_eq!(body["method"], "qr");
                assert_eq!(body["status"], "present");
            }
            other => panic!("unexpected body {:?}", other),
        }
        // A plain failure does not end the session
        assert!(ctx.session.load().is_authenticated());
    }

    #[test]
    fn test_scan_stops_on_forced_logout() {
        let transport = FakeTransport::new();
        let ctx = logged_in(&transport, Role::Lecturer);
        transport.push_json(401, json!({"status": "error", "message": "Token is invalid"}));

        let mut source = LineScanSource::new(Cursor::new("S001\nS002\nS003\n"));
        run_scan(&ctx, "CS101", &mut source, &ScanWindow::default()).unwrap();
        assert_eq!(transport.requests().len(), 1);
        assert!(!ctx.session.load().is_authenticated());
    }

    #[test]
    fn test_scan_after_window_closes_marks_nothing() {
        let transport = FakeTransport::new();
        let ctx = logged_in(&transport, Role::Lecturer);
        let window = ScanWindow::default();
        window.cancel.cancel();

        let mut source = LineScanSource::new(Cursor::new("S001\nS002\n"));
        let outcome = run_scan(&ctx, "CS101", &mut source, &window).unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert!(transport.requests().is_empty());
        assert!(ctx.session.load().is_authenticated());
    }

    #[test]
    fn test_scan_marks_use_window_timeout() {
        let transport = FakeTransport::new();
        let ctx = logged_in(&transport, Role::Lecturer);
        transport.push_json(200, json!({"status": "success"}));
        let window = ScanWindow::open(None, Some(Duration::from_millis(1500)));

        let mut source = LineScanSource::new(Cursor::new("S001\n"));
        assert_eq!(
            run_scan(&ctx, "CS101", &mut source, &window).unwrap(),
            Outcome::Done
        );
        assert_eq!(
            transport.last_request().unwrap().timeout,
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_scan_window_closes_after_expiry() {
        let window = ScanWindow::open(Some(Duration::from_millis(10)), None);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !window.is_closed() {
            assert!(std::time::Instant::now() < deadline, "window never closed");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_scan_flags_parse() {
        match parse("lecturer scan --course CS101 --expires-in 15 --mark-timeout-ms 2000") {
            Command::Lecturer {
                action:
                    LecturerCommand::Scan {
                        expires_in,
                        mark_timeout_ms,
                        ..
                    },
            } => {
                assert_eq!(expires_in, Some(15));
                assert_eq!(mark_timeout_ms, Some(2000));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_entry_command_opens_own_section() {
        for role in Role::ALL {
            let line = entry_command(role).trim_start_matches("attend ");
            let page = parse(line).page();
            assert_eq!(routes::section_of(&page), Some(role), "{}", line);
        }
    }

    #[test]
    fn test_login_page_while_logged_in_goes_to_dashboard() {
        let transport = FakeTransport::new();
        let ctx = logged_in(&transport, Role::Examiner);
        let outcome = run_command(
            &ctx,
            &parse("login --role admin --user-id A1 --password pw"),
            &Printer::new(false),
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Redirected);
        assert_eq!(
            ctx.navigator.location(),
            Some(routes::dashboard_page(Role::Examiner))
        );
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_whoami_reads_resolved_state() {
        let transport = FakeTransport::new();
        let ctx = test_context(&transport);
        assert_eq!(
            run_command(&ctx, &parse("whoami"), &Printer::new(true)).unwrap(),
            Outcome::Done
        );
        assert_eq!(ctx.auth.state(), AuthState::Unauthenticated);

        ctx.session.save("tok", &profile("S1", Role::Student)).unwrap();
        run_command(&ctx, &parse("whoami"), &Printer::new(true)).unwrap();
        assert_eq!(
            ctx.auth.state(),
            AuthState::Authenticated(profile("S1", Role::Student))
        );
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn test_request_sends_saved_token_and_body() {
        let transport = FakeTransport::new();
        let ctx = logged_in(&transport, Role::Admin);
        transport.push_json(200, json!({"status": "success"}));
        transport.push_json(404, json!({"status": "error", "message": "Not found"}));

        let outcome = run_command(
            &ctx,
            &parse(r#"request post register --data '{"user_id": "S9"}'"#),
            &Printer::new(false),
        )
        .unwrap();
        assert_eq!(outcome, Outcome::Done);
        let sent = transport.last_request().unwrap();
        assert_eq!(sent.method, Method::Post);
        assert_eq!(sent.url, "http://backend.test/register");
        assert_eq!(sent.header("Authorization"), Some("Bearer tok"));
        match &sent.body {
            Body::Json(body) => assert_eq!(body["user_id"], "S9"),
            other => panic!("unexpected body {:?}", other),
        }

        let outcome =
            run_command(&ctx, &parse("request GET /missing"), &Printer::new(false)).unwrap();
        assert_eq!(outcome, Outcome::Failed);
        // Raw responses are not classified, so the session survives
        assert!(ctx.session.load().is_authenticated());
    }

    #[test]
    fn test_request_rejects_bad_json_before_sending() {
        let transport = FakeTransport::new();
        let ctx = logged_in(&transport, Role::Admin);
        let result = run_command(
            &ctx,
            &parse("request put /users/S1 --data '{not json'"),
            &Printer::new(false),
        );
        assert!(result.is_err());
        assert!(transport.requests().is_empty());
    }
}
