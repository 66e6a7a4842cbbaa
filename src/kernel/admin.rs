//! Owner control panel - `/core` and every `core_*` button

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::core::{format_gc, resident_memory_kb, BotCore};
use super::events::Severity;
use super::progress::ProgressTarget;
use crate::application::format::{escape_html, truncate};
use crate::application::messaging::{Handler, HandlerResult, Trigger};
use crate::domain::entities::{Content, Message, Page};
use crate::domain::traits::{Keyboard, KeyboardButton, RawQueryResult};
use crate::infrastructure::logging;

const TITLE: &str = "🎛 <b>Core control panel</b>";

/// Characters of result table a panel message may carry
const TABLE_BUDGET: usize = 3800;
const SQL_ERROR_CHARS: usize = 3500;

/// Free-text input an owner chat is expected to send next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingInput {
    SqlPassword,
    SqlQuery,
    FindUser,
}

/// Per-chat conversation state of the panel.
///
/// The SQL console stays unlocked for the rest of the process once the
/// password was accepted.
#[derive(Debug, Default)]
pub struct AdminSessions {
    pending: Mutex<HashMap<i64, PendingInput>>,
    sql_unlocked: AtomicBool,
}

impl AdminSessions {
    pub fn expect(&self, chat_id: i64, input: PendingInput) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chat_id, input);
    }

    pub fn take(&self, chat_id: i64) -> Option<PendingInput> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&chat_id)
    }

    pub fn pending(&self, chat_id: i64) -> Option<PendingInput> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat_id)
            .copied()
    }

    pub fn is_sql_unlocked(&self) -> bool {
        self.sql_unlocked.load(Ordering::SeqCst)
    }

    pub fn unlock_sql(&self) {
        self.sql_unlocked.store(true, Ordering::SeqCst);
    }
}

/// Decoded `core_*` callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Main,
    Stats,
    Modules(usize),
    Users(usize),
    ToggleMaintenance,
    RestartMenu,
    ReloadModules,
    RestartProcess,
    Gc,
    FileLogs,
    KernelLogs(usize),
    DbMenu,
    DbInfo,
    DbLastUsers,
    DbFindUser,
    DbExecuteSql,
    CancelInput,
    Close,
}

impl AdminAction {
    pub fn parse(data: &str) -> Option<Self> {
        let paged = |prefix: &str| data.strip_prefix(prefix).and_then(|p| p.parse::<usize>().ok());

        if let Some(page) = paged("core_modules_page_") {
            return Some(AdminAction::Modules(page));
        }
        if let Some(page) = paged("core_users_page_") {
            return Some(AdminAction::Users(page));
        }
        if let Some(page) = paged("core_kernel_logs_page_") {
            return Some(AdminAction::KernelLogs(page));
        }

        let action = match data {
            "core_back_to_main" => AdminAction::Main,
            "core_stats" => AdminAction::Stats,
            "core_toggle_maintenance" => AdminAction::ToggleMaintenance,
            "core_restart_menu" => AdminAction::RestartMenu,
            "core_reload_all_modules" => AdminAction::ReloadModules,
            "core_restart_bot" => AdminAction::RestartProcess,
            "core_gc" => AdminAction::Gc,
            "core_logs" => AdminAction::FileLogs,
            "core_db_menu" => AdminAction::DbMenu,
            "core_db_info" => AdminAction::DbInfo,
            "core_db_template_last5users" => AdminAction::DbLastUsers,
            "core_db_template_find_user" => AdminAction::DbFindUser,
            "core_db_execute_sql" => AdminAction::DbExecuteSql,
            "core_input_cancel" => AdminAction::CancelInput,
            "core_close" => AdminAction::Close,
            _ => return None,
        };
        Some(action)
    }
}

/// Handlers the core attaches for itself
pub fn handlers() -> Vec<Handler> {
    vec![
        Handler::command("core", core_command),
        Handler::callback("core_", core_callback),
        Handler::new(Trigger::Text, pending_input).with_group(-10),
    ]
}

fn back_to(data: &str) -> Keyboard {
    vec![vec![KeyboardButton::callback("⬅️ Back", data)]]
}

fn back() -> Keyboard {
    back_to("core_back_to_main")
}

fn cancel_input() -> Keyboard {
    vec![vec![KeyboardButton::callback("❌ Cancel", "core_input_cancel")]]
}

pub fn main_keyboard(maintenance: bool) -> Keyboard {
    let maintenance_label = if maintenance {
        "🔴 Disable maintenance"
    } else {
        "🟢 Enable maintenance"
    };
    vec![
        vec![KeyboardButton::callback("📊 Statistics", "core_stats")],
        vec![KeyboardButton::callback("🔌 Modules", "core_modules_page_0")],
        vec![KeyboardButton::callback("👥 Users", "core_users_page_0")],
        vec![KeyboardButton::callback("🗄️ Database", "core_db_menu")],
        vec![KeyboardButton::callback(maintenance_label, "core_toggle_maintenance")],
        vec![KeyboardButton::callback("⚙️ Restart", "core_restart_menu")],
        vec![KeyboardButton::callback("🧹 Compact memory", "core_gc")],
        vec![KeyboardButton::callback("📝 Logs (file)", "core_logs")],
        vec![KeyboardButton::callback("📓 Logs (kernel)", "core_kernel_logs_page_0")],
        vec![KeyboardButton::callback("❌ Close", "core_close")],
    ]
}

/// Prev/next row plus the way back to the main menu
fn pager<T>(page: &Page<T>, prefix: &str) -> Keyboard {
    let mut row = Vec::new();
    if page.has_previous() {
        row.push(KeyboardButton::callback("⬅️", format!("{}{}", prefix, page.page - 1)));
    }
    if page.has_next() {
        row.push(KeyboardButton::callback("➡️", format!("{}{}", prefix, page.page + 1)));
    }
    let mut keyboard = Vec::new();
    if !row.is_empty() {
        keyboard.push(row);
    }
    keyboard.push(vec![KeyboardButton::callback("⬅️ Back to menu", "core_back_to_main")]);
    keyboard
}

/// Edit the panel message for button presses, send a new one otherwise
async fn respond(core: &BotCore, msg: &Message, text: &str, keyboard: Option<&Keyboard>) {
    if let (Content::Callback { .. }, Some(message_id)) = (&msg.content, msg.message_id) {
        if core.safe_edit_message(msg.chat_id, message_id, text, keyboard).await {
            return;
        }
    }
    core.safe_send_message(msg.chat_id, text, keyboard).await;
}

async fn core_command(core: Arc<BotCore>, msg: Message) -> HandlerResult {
    if !core.is_owner(msg.user_id()) {
        core.safe_send_message(msg.chat_id, "❌ You are not allowed to use this command", None)
            .await;
        return Ok(());
    }
    let keyboard = main_keyboard(core.is_maintenance());
    core.safe_send_message(msg.chat_id, TITLE, Some(&keyboard)).await;
    Ok(())
}

async fn core_callback(core: Arc<BotCore>, msg: Message) -> HandlerResult {
    let Content::Callback { query_id, data } = &msg.content else {
        return Ok(());
    };

    if !core.is_owner(msg.user_id()) {
        core.answer_callback(query_id, Some("❌ Not allowed")).await;
        return Ok(());
    }

    let Some(action) = AdminAction::parse(data) else {
        tracing::debug!(data = %data, "Unknown core callback");
        core.answer_callback(query_id, None).await;
        return Ok(());
    };

    if action == AdminAction::ToggleMaintenance {
        let enabled = core.toggle_maintenance();
        let notice = if enabled {
            "⚙️ Maintenance mode on"
        } else {
            "✅ Maintenance mode off"
        };
        core.answer_callback(query_id, Some(notice)).await;
    } else {
        core.answer_callback(query_id, None).await;
    }

    match action {
        AdminAction::Main => {
            let keyboard = main_keyboard(core.is_maintenance());
            respond(&core, &msg, TITLE, Some(&keyboard)).await;
        }
        AdminAction::Stats => show_stats(&core, &msg).await,
        AdminAction::Modules(page) => show_modules(&core, &msg, page).await,
        AdminAction::Users(page) => show_users(&core, &msg, page).await,
        AdminAction::ToggleMaintenance => {
            let text = if core.is_maintenance() {
                "🔴 Maintenance mode is <b>ON</b>."
            } else {
                "🟢 Maintenance mode is <b>OFF</b>."
            };
            let keyboard = main_keyboard(core.is_maintenance());
            respond(&core, &msg, text, Some(&keyboard)).await;
        }
        AdminAction::RestartMenu => {
            let keyboard = vec![
                vec![KeyboardButton::callback("🔄 Reload modules", "core_reload_all_modules")],
                vec![KeyboardButton::callback("💥 Restart process", "core_restart_bot")],
                vec![KeyboardButton::callback("⬅️ Back", "core_back_to_main")],
            ];
            respond(&core, &msg, "⚙️ <b>Restart</b>\n\nChoose what to restart:", Some(&keyboard)).await;
        }
        AdminAction::ReloadModules => reload_modules(&core, &msg).await,
        AdminAction::RestartProcess => restart_process(&core, &msg).await,
        AdminAction::Gc => {
            respond(&core, &msg, "🧹 Compacting memory…", None).await;
            let report = core.collect_garbage();
            let text = format!("🧹 <b>Memory compacted</b>\n\n{}", format_gc(&report));
            respond(&core, &msg, &text, Some(&back())).await;
        }
        AdminAction::FileLogs => show_file_logs(&core, &msg).await,
        AdminAction::KernelLogs(page) => show_kernel_logs(&core, &msg, page).await,
        AdminAction::DbMenu => show_db_menu(&core, &msg).await,
        AdminAction::DbInfo => show_db_info(&core, &msg).await,
        AdminAction::DbLastUsers => show_last_users(&core, &msg).await,
        AdminAction::DbFindUser => {
            core.admin_sessions().expect(msg.chat_id, PendingInput::FindUser);
            respond(&core, &msg, "🆔 Send the Telegram ID of the user to look up.", Some(&cancel_input())).await;
        }
        AdminAction::DbExecuteSql => start_sql(&core, &msg).await,
        AdminAction::CancelInput => {
            core.admin_sessions().take(msg.chat_id);
            show_db_menu(&core, &msg).await;
        }
        AdminAction::Close => {
            respond(&core, &msg, "🎛 Panel closed.", None).await;
        }
    }
    Ok(())
}

async fn show_stats(core: &BotCore, msg: &Message) {
    let users = match core.store().count_users().await {
        Ok(count) => count.to_string(),
        Err(e) => {
            core.log_kernel_event(Severity::Error, "Statistics", e.to_string());
            format!("error: {}", escape_html(&e.to_string()))
        }
    };
    let memory = resident_memory_kb()
        .map(|kb| format!("{:.2} MB", kb as f64 / 1024.0))
        .unwrap_or_else(|| "n/a".to_string());
    let uptime = core.uptime().as_secs();
    let stats = core.stats();

    let parts = [
        "📊 <b>Statistics</b>".to_string(),
        String::new(),
        format!("<code>Uptime        :</code> {}h {}m {}s", uptime / 3600, uptime / 60 % 60, uptime % 60),
        format!("<code>Messages      :</code> {}", stats.messages.messages()),
        format!("<code>Commands      :</code> {}", stats.messages.commands()),
        format!("<code>Errors        :</code> {}", stats.errors()),
        format!("<code>Reloads       :</code> {}", stats.reloads()),
        format!("<code>Modules       :</code> {}", core.loaded_modules().len()),
        format!("<code>Resources     :</code> {}", core.resource_names().len()),
        format!("<code>Users         :</code> {}", users),
        format!("<code>Kernel events :</code> {}", core.kernel_log().len()),
        format!("<code>Reload state  :</code> {}", core.reload_state()),
        format!("<code>Memory (RSS)  :</code> {}", memory),
        format!("<code>Maintenance   :</code> {}", if core.is_maintenance() { "on" } else { "off" }),
    ];
    respond(core, msg, &parts.join("\n"), Some(&back())).await;
}

async fn show_modules(core: &BotCore, msg: &Message, page: usize) {
    let status = core.module_status();
    if status.is_empty() {
        respond(core, msg, "🔌 No modules loaded", Some(&back())).await;
        return;
    }

    let page = Page::slice(&status, page, core.config().admin.modules_per_page);
    let mut parts = vec![format!(
        "🔌 <b>Modules (page {}/{})</b>",
        page.page + 1,
        page.total_pages
    )];
    for info in &page.items {
        let icon = if info.enabled && info.error_count == 0 { "✅" } else { "❌" };
        let errors = if info.error_count > 0 {
            format!(" ({} errors)", info.error_count)
        } else {
            String::new()
        };
        let exports = if info.exports.len() > 3 {
            format!("{}, ...", info.exports[..3].join(", "))
        } else {
            info.exports.join(", ")
        };
        parts.push(format!(
            "{} <b>{}</b>{}\n  ├ <i>Loaded:</i> <code>{}</code>\n  ├ <i>Commands:</i> <code>{}</code>\n  ├ <i>Handlers:</i> <code>{}</code>\n  ├ <i>Exports:</i> <code>{}</code>\n  ├ <i>Source:</i> <code>{}</code>\n  └ <i>Error:</i> <code>{}</code>",
            icon,
            escape_html(&info.name),
            errors,
            info.loaded_at.format("%Y-%m-%d %H:%M:%S"),
            escape_html(&info.commands.join(", ")),
            info.handler_count,
            escape_html(&exports),
            escape_html(info.source),
            escape_html(info.last_error.as_deref().unwrap_or("none")),
        ));
    }
    let keyboard = pager(&page, "core_modules_page_");
    respond(core, msg, &parts.join("\n\n"), Some(&keyboard)).await;
}

async fn show_users(core: &BotCore, msg: &Message, page: usize) {
    let page_size = core.config().admin.users_per_page;
    let store = core.store();

    let total = match store.count_users().await {
        Ok(total) => total,
        Err(e) => {
            core.log_kernel_event(Severity::Error, "User listing", e.to_string());
            let text = format!("❌ User database unavailable: {}", escape_html(&e.to_string()));
            respond(core, msg, &text, Some(&back())).await;
            return;
        }
    };
    let total_pages = total.div_ceil(page_size).max(1);
    let page = page.min(total_pages - 1);

    let users = match store.list_users(page_size, page * page_size).await {
        Ok(users) => users,
        Err(e) => {
            core.log_kernel_event(Severity::Error, "User listing", e.to_string());
            let text = format!("❌ User database unavailable: {}", escape_html(&e.to_string()));
            respond(core, msg, &text, Some(&back())).await;
            return;
        }
    };

    let listing = Page {
        items: users,
        page,
        total_pages,
        total_items: total,
    };
    let first = if total == 0 { 0 } else { page * page_size + 1 };
    let last = ((page + 1) * page_size).min(total);
    let mut text = format!("👥 <b>Users ({}-{} of {})</b>\n\n", first, last, total);
    if listing.items.is_empty() {
        text.push_str("<i>No users found.</i>");
    }
    for user in &listing.items {
        text.push_str(&format!(
            "<code>{}</code> - {} (joined {})\n",
            user.telegram_id,
            escape_html(&user.nickname),
            user.created_at.format("%Y-%m-%d")
        ));
    }
    let keyboard = pager(&listing, "core_users_page_");
    respond(core, msg, &text, Some(&keyboard)).await;
}

async fn show_kernel_logs(core: &BotCore, msg: &Message, page: usize) {
    if core.kernel_log().is_empty() {
        respond(core, msg, "📓 <b>No kernel events this session.</b>", Some(&back())).await;
        return;
    }

    let page = core
        .kernel_log()
        .page(page, core.config().admin.events_per_page);
    let mut text = format!("📓 <b>Kernel log (page {}/{})</b>\n\n", page.page + 1, page.total_pages);
    for event in &page.items {
        text.push_str(&format!(
            "{} [<code>{}</code>] <b>{}</b>\n   └ <i>{}</i>\n",
            event.severity.icon(),
            event.timestamp.format("%H:%M:%S"),
            escape_html(&event.action),
            escape_html(&event.outcome)
        ));
    }
    let keyboard = pager(&page, "core_kernel_logs_page_");
    respond(core, msg, &text, Some(&keyboard)).await;
}

async fn show_file_logs(core: &BotCore, msg: &Message) {
    let lines = core.config().admin.log_tail_lines;
    let Some(path) = core.config().logging.file.clone() else {
        respond(core, msg, "📝 File logging is not configured.", Some(&back())).await;
        return;
    };

    let text = match logging::tail(&path, lines) {
        Ok(tail) if tail.is_empty() => "📝 Log file is empty.".to_string(),
        Ok(tail) => {
            let body = escape_html(tail.join("\n").trim());
            let text = format!(
                "📝 <b>Last {} log lines ({}):</b>\n\n<pre><code>{}</code></pre>",
                lines,
                escape_html(&path.display().to_string()),
                body
            );
            if text.chars().count() > 4000 {
                format!("{}</code></pre>", truncate(&text, 3980))
            } else {
                text
            }
        }
        Err(e) => format!("❌ Could not read log: {}", escape_html(&e.to_string())),
    };
    respond(core, msg, &text, Some(&back())).await;
}

async fn reload_modules(core: &Arc<BotCore>, msg: &Message) {
    let target = msg.message_id.map(|message_id| ProgressTarget {
        chat_id: msg.chat_id,
        message_id,
    });

    // The failure text was already written into the panel message
    if let Ok(report) = core.reload_all_modules(target).await {
        let mut text = format!("✅ <b>Modules reloaded</b>\n\n{}", escape_html(&report.summary()));
        for (name, reason) in report.failed_imports.iter().chain(report.setup_failures.iter()) {
            text.push_str(&format!("\n❌ <b>{}</b>: <code>{}</code>", escape_html(name), escape_html(reason)));
        }
        respond(core, msg, &text, Some(&back())).await;
    }
}

async fn restart_process(core: &BotCore, msg: &Message) {
    core.log_kernel_event(
        Severity::Stable,
        "Process restart",
        format!("requested by {}", msg.user_id()),
    );
    respond(core, msg, "🤖 <b>Restarting…</b>", None).await;

    let error = exec_self();
    core.log_kernel_event(Severity::Panic, "Process restart", error.to_string());
    let text = format!("‼️ <b>Restart failed</b>\n<code>{}</code>", escape_html(&error.to_string()));
    respond(core, msg, &text, Some(&back())).await;
}

/// Replace the running process with a fresh copy; only returns on failure
#[cfg(unix)]
fn exec_self() -> std::io::Error {
    use std::os::unix::process::CommandExt;
    match std::env::current_exe() {
        Ok(exe) => std::process::Command::new(exe).args(std::env::args().skip(1)).exec(),
        Err(e) => e,
    }
}

#[cfg(not(unix))]
fn exec_self() -> std::io::Error {
    match std::env::current_exe() {
        Ok(exe) => match std::process::Command::new(exe).args(std::env::args().skip(1)).spawn() {
            Ok(_) => std::process::exit(0),
            Err(e) => e,
        },
        Err(e) => e,
    }
}

async fn show_db_menu(core: &BotCore, msg: &Message) {
    let keyboard = vec![
        vec![KeyboardButton::callback("ℹ️ Database info", "core_db_info")],
        vec![KeyboardButton::callback("USERS: last 5", "core_db_template_last5users")],
        vec![KeyboardButton::callback("USERS: find by ID", "core_db_template_find_user")],
        vec![KeyboardButton::callback("✏️ Run raw SQL", "core_db_execute_sql")],
        vec![KeyboardButton::callback("⬅️ Back", "core_back_to_main")],
    ];
    respond(core, msg, "🗄️ <b>Database</b>\n\nChoose an action:", Some(&keyboard)).await;
}

async fn show_db_info(core: &BotCore, msg: &Message) {
    let text = match core.store().table_counts().await {
        Ok(tables) => {
            let rows: Vec<String> = tables
                .iter()
                .map(|(table, count)| format!("  • <code>{}</code>: {} rows", escape_html(table), count))
                .collect();
            let listing = if rows.is_empty() {
                "<i>No tables found.</i>".to_string()
            } else {
                rows.join("\n")
            };
            format!("🗄️ <b>Database info</b>\n\n<b>Engine:</b> <code>SQLite</code>\n\n<b>Tables:</b>\n{}", listing)
        }
        Err(e) => {
            core.log_kernel_event(Severity::Error, "Database info", e.to_string());
            format!("❌ <b>Database info unavailable:</b>\n<code>{}</code>", escape_html(&e.to_string()))
        }
    };
    respond(core, msg, &text, Some(&back_to("core_db_menu"))).await;
}

async fn show_last_users(core: &BotCore, msg: &Message) {
    let text = match core.store().list_users(5, 0).await {
        Ok(users) if users.is_empty() => "<i>No users in the database.</i>".to_string(),
        Ok(users) => {
            let headers = vec!["telegram_id".to_string(), "nickname".to_string(), "username".to_string(), "created_at".to_string()];
            let rows = users
                .into_iter()
                .map(|u| {
                    vec![
                        u.telegram_id.to_string(),
                        u.nickname,
                        u.username.unwrap_or_else(|| "N/A".to_string()),
                        u.created_at.format("%Y-%m-%d").to_string(),
                    ]
                })
                .collect::<Vec<_>>();
            format_sql_result(&headers, &rows, 5)
        }
        Err(e) => {
            core.log_kernel_event(Severity::Error, "Last users", e.to_string());
            format!("❌ <b>Query failed:</b>\n<code>{}</code>", escape_html(&e.to_string()))
        }
    };
    respond(core, msg, &text, Some(&back_to("core_db_menu"))).await;
}

async fn start_sql(core: &BotCore, msg: &Message) {
    if core.config().admin.sql_password.is_none() {
        respond(core, msg, "🔒 The SQL console is disabled (no admin password configured).", Some(&back_to("core_db_menu"))).await;
        return;
    }

    let sessions = core.admin_sessions();
    if sessions.is_sql_unlocked() {
        sessions.expect(msg.chat_id, PendingInput::SqlQuery);
        respond(
            core,
            msg,
            "✏️ Send the SQL statement to run.\n\n<b>Careful:</b> this can modify or delete data.",
            Some(&cancel_input()),
        )
        .await;
    } else {
        sessions.expect(msg.chat_id, PendingInput::SqlPassword);
        respond(
            core,
            msg,
            "🔐 <b>Authentication required</b>\n\nSend the console password from <code>admin.sql-password</code>.",
            Some(&cancel_input()),
        )
        .await;
    }
}

/// Follow-up text for a pending panel prompt; no-op for everyone else
async fn pending_input(core: Arc<BotCore>, msg: Message) -> HandlerResult {
    let Some(text) = msg.content.text().map(str::to_string) else {
        return Ok(());
    };
    if !core.is_owner(msg.user_id()) {
        return Ok(());
    }
    let sessions = core.admin_sessions();
    let Some(pending) = sessions.take(msg.chat_id) else {
        return Ok(());
    };

    match pending {
        PendingInput::SqlPassword => {
            let accepted = core.config().admin.sql_password.as_deref() == Some(text.as_str());
            if accepted {
                sessions.unlock_sql();
                sessions.expect(msg.chat_id, PendingInput::SqlQuery);
                core.log_kernel_event(Severity::Stable, "SQL console", format!("password accepted from {}", msg.user_id()));
                core.safe_send_message(msg.chat_id, "✅ Password accepted. Send the SQL statement to run.", Some(&cancel_input()))
                    .await;
            } else {
                core.log_kernel_event(Severity::Warning, "SQL console", format!("wrong password from {}", msg.user_id()));
                core.safe_send_message(msg.chat_id, "❌ Wrong password.", Some(&back())).await;
            }
        }
        PendingInput::SqlQuery => {
            let max_rows = core.config().admin.sql_max_rows;
            let response = match core.store().execute_raw(&text).await {
                Ok(RawQueryResult::Rows { headers, rows }) => {
                    core.log_kernel_event(Severity::Warning, "SQL console", format!("ran: {}", truncate(&text, 50)));
                    let shown: Vec<Vec<String>> = rows.into_iter().take(max_rows).collect();
                    format_sql_result(&headers, &shown, max_rows)
                }
                Ok(RawQueryResult::Affected(count)) => {
                    core.log_kernel_event(Severity::Warning, "SQL console", format!("ran: {}", truncate(&text, 50)));
                    format!("✅ Statement executed. Rows affected: <b>{}</b>", count)
                }
                Err(e) => {
                    core.log_kernel_event(Severity::Error, "SQL console", e.to_string());
                    format!(
                        "❌ <b>Statement failed:</b>\n\n<pre><code>{}</code></pre>",
                        escape_html(&truncate(&e.to_string(), SQL_ERROR_CHARS))
                    )
                }
            };
            core.safe_send_message(msg.chat_id, &response, Some(&back_to("core_db_menu")))
                .await;
        }
        PendingInput::FindUser => {
            let Ok(telegram_id) = text.trim().parse::<i64>() else {
                sessions.expect(msg.chat_id, PendingInput::FindUser);
                core.safe_send_message(msg.chat_id, "❌ A Telegram ID is a number. Try again.", Some(&cancel_input()))
                    .await;
                return Ok(());
            };
            let response = match core.store().get_user(telegram_id).await {
                Ok(Some(user)) => {
                    let headers = vec!["field".to_string(), "value".to_string()];
                    let rows = vec![
                        vec!["telegram_id".to_string(), user.telegram_id.to_string()],
                        vec!["nickname".to_string(), user.nickname],
                        vec!["username".to_string(), user.username.unwrap_or_else(|| "N/A".to_string())],
                        vec!["role".to_string(), user.role],
                        vec!["quote".to_string(), user.quote.unwrap_or_else(|| "N/A".to_string())],
                        vec!["created_at".to_string(), user.created_at.format("%Y-%m-%d %H:%M:%S").to_string()],
                    ];
                    format_sql_result(&headers, &rows, 20)
                }
                Ok(None) => format!("🤷 No user with Telegram ID <code>{}</code>.", telegram_id),
                Err(e) => {
                    core.log_kernel_event(Severity::Error, "Find user", e.to_string());
                    format!("❌ <b>Query failed:</b>\n<code>{}</code>", escape_html(&e.to_string()))
                }
            };
            core.safe_send_message(msg.chat_id, &response, Some(&back_to("core_db_menu")))
                .await;
        }
    }
    Ok(())
}

/// Render rows as one `<code>` line each, cells cut to 30 characters.
///
/// Rows that would push the table past `TABLE_BUDGET` characters are left
/// out whole, so the markup always stays balanced.
pub fn format_sql_result(headers: &[String], rows: &[Vec<String>], limit: usize) -> String {
    if rows.is_empty() {
        return "✅ Statement executed, no rows returned.".to_string();
    }

    let line = |cells: &[String]| {
        let cut: Vec<String> = cells.iter().map(|c| escape_html(&truncate(c, 30))).collect();
        format!("<code>{}</code>", cut.join(", "))
    };

    let mut table = line(headers);
    let mut used = table.chars().count();
    let mut shown = 0;
    for row in rows {
        let next = line(row.as_slice());
        let len = next.chars().count() + 1;
        if used + len > TABLE_BUDGET {
            break;
        }
        used += len;
        table.push('\n');
        table.push_str(&next);
        shown += 1;
    }

    let mut text = format!("✅ <b>Result ({} rows):</b>\n\n{}", rows.len(), table);
    if shown < rows.len() {
        text.push_str(&format!("\n\n<i>(showing {} of {} rows, message size limit)</i>", shown, rows.len()));
    } else if rows.len() >= limit {
        text.push_str(&format!("\n\n<i>(output limited to {} rows)</i>", limit));
    }
    text
}
