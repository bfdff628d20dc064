use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::auth::ApiKeyAuthSource;
use crate::engine::{CalendarEntry, Engine, EngineError};
use crate::mailer::{self, Mailer};
use crate::model::*;
use crate::notify::{self, Notification};
use crate::observability::{self, command_label};
use crate::sql::{self, Command, ResultSource, SqlError};
use crate::tenant::TenantManager;

/// Everything connections share.
pub struct ServerState {
    pub tenants: Arc<TenantManager>,
    pub mailer: Arc<Mailer>,
    /// Shared secret presented as the startup password.
    pub api_key: String,
}

/// Per-connection query handler. Holds the connection's `LISTEN` subscriptions,
/// which end with it.
pub struct HallbookHandler {
    state: Arc<ServerState>,
    peer_ip: String,
    listening: Mutex<HashMap<String, broadcast::Receiver<Notification>>>,
    query_parser: Arc<HallbookQueryParser>,
}

impl HallbookHandler {
    pub fn new(state: Arc<ServerState>, peer: SocketAddr) -> Self {
        Self {
            state,
            peer_ip: peer.ip().to_string(),
            listening: Mutex::new(HashMap::new()),
            query_parser: Arc::new(HallbookQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.state
            .tenants
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// The startup `user` is the acting user id.
    fn actor<C: ClientInfo>(&self, client: &C) -> Actor {
        let user = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_else(|| "anonymous".to_string());
        Actor::new(user, self.peer_ip.clone())
    }

    async fn run<C>(&self, client: &mut C, parsed: Result<Command, SqlError>) -> PgWireResult<Response>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.actor(client);
        let cmd = parsed.map_err(sql_err)?;

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&engine, &actor, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);

        // Includes anything this statement itself just published.
        self.deliver_notifications(client).await?;
        result.map_err(|e| {
            debug!("{label} failed for {}: {e}", actor.user_id);
            engine_err(e)
        })
    }

    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let mut pending = Vec::new();
        {
            let mut listening = self.listening.lock().await;
            for (channel, rx) in listening.iter_mut() {
                loop {
                    match rx.try_recv() {
                        Ok(n) => pending.push(n),
                        Err(TryRecvError::Lagged(skipped)) => {
                            warn!("listener on {channel} fell behind, {skipped} notifications dropped");
                        }
                        Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                    }
                }
            }
        }
        for n in pending {
            client
                .send(PgWireBackendMessage::NotificationResponse(NotificationResponse::new(
                    0, n.channel, n.payload,
                )))
                .await?;
            metrics::counter!(observability::NOTIFICATIONS_SENT_TOTAL).increment(1);
        }
        Ok(())
    }

    async fn execute_command(&self, engine: &Engine, actor: &Actor, cmd: Command) -> Result<Response, EngineError> {
        match cmd {
            Command::InsertFacility { name, returning } => {
                let facility = engine.create_facility(actor, &name).await?;
                Ok(inserted(returning, "facilities", [facility], encode_facility))
            }
            Command::RenameFacility { code, name } => {
                engine.rename_facility(actor, &code, &name).await?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteFacility { code } => {
                engine.delete_facility(actor, &code).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectFacilities => {
                let facilities = engine.list_facilities().await;
                Ok(rows(schema("facilities", false), facilities, encode_facility))
            }

            Command::InsertUser { user, returning } => {
                let info = engine.create_user(actor, user).await?;
                Ok(inserted(returning, "users", [info], encode_user))
            }
            Command::ImportUser { id, user, returning } => {
                let info = engine.import_user(actor, &id, user).await?;
                Ok(inserted(returning, "users", [info], encode_user))
            }
            Command::UpdateUser { id, update } => {
                engine.update_user(actor, &id, update).await?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteUser { id } => {
                engine.delete_user(actor, &id).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectUsers(filter) => {
                let page = engine.list_users(&filter).await?;
                let total = page.total as i64;
                Ok(rows(schema("users", false), page.users, |enc, user| {
                    encode_user(enc, user)?;
                    enc.encode_field(&total)
                }))
            }

            Command::InsertReservation { reservation, returning } => {
                let reservation = engine.submit_reservation(actor, reservation).await?;
                Ok(inserted(returning, "reservations", [reservation], encode_reservation))
            }
            Command::SetReservationStatus { id, status } => {
                let reservation = engine.set_reservation_status(actor, &id, status).await?;
                self.mail_requester(engine, &reservation).await;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectReservations(filter) => {
                let reservations = engine.list_reservations(&filter).await?;
                Ok(rows(schema("reservations", false), reservations, encode_reservation))
            }

            Command::InsertManualEvents { events, returning } => {
                let added = engine.add_manual_events(actor, events).await?;
                Ok(inserted(returning, "manual_events", added, encode_manual_event))
            }
            Command::DuplicateManualEvent { id, date, returning } => {
                let copy = engine.duplicate_manual_event(actor, id, date).await?;
                Ok(inserted(returning, "manual_events", [copy], encode_manual_event))
            }
            Command::UpdateManualEvent { id, update } => {
                engine.update_manual_event(actor, id, update).await?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteManualEvent { id } => {
                engine.remove_manual_event(actor, id).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectManualEvents { facility, date } => {
                let events = engine.list_manual_events(facility.as_deref(), date).await?;
                Ok(rows(schema("manual_events", false), events, encode_manual_event))
            }

            Command::SelectActivityLogs { user_id, limit, offset } => {
                let logs = engine.activity_logs(user_id.as_deref(), limit, offset).await?;
                Ok(rows(schema("activity_logs", false), logs, encode_activity))
            }
            Command::SelectCalendar { from, to, facility } => {
                let days = engine.calendar(from, to, facility.as_deref()).await?;
                let entries = days
                    .into_iter()
                    .flat_map(|(date, entries)| entries.into_iter().map(move |e| (date, e)));
                Ok(rows(schema("calendar", false), entries, encode_calendar_entry))
            }
            Command::SelectConflicts {
                facility,
                date,
                start,
                end,
            } => {
                let entries = engine.conflicts(&facility, date, start, end).await?;
                if !entries.is_empty() {
                    metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
                }
                let entries = entries.into_iter().map(|e| (date, e));
                Ok(rows(schema("conflicts", false), entries, encode_calendar_entry))
            }
            Command::SelectSession { email, password } => {
                let session = match engine.authenticate(&email, &password, &self.peer_ip).await {
                    Ok(session) => session,
                    Err(e) => {
                        metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                        return Err(e);
                    }
                };
                Ok(rows(schema("sessions", false), [session], |enc, s| {
                    enc.encode_field(&s.user_id)?;
                    enc.encode_field(&s.user_name)?;
                    enc.encode_field(&s.role.as_str())
                }))
            }

            Command::Listen { channel } => {
                let channel = notify::normalize_channel(&channel)
                    .ok_or_else(|| EngineError::validation(format!("no such channel: {channel}")))?;
                self.listening
                    .lock()
                    .await
                    .entry(channel.clone())
                    .or_insert_with(|| engine.notify.subscribe(&channel));
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                if let Some(channel) = notify::normalize_channel(&channel) {
                    self.listening.lock().await.remove(&channel);
                }
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.listening.lock().await.clear();
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }

    /// Approved and rejected reservations are mailed to the requester. Missing
    /// users and relay failures never fail the status change.
    async fn mail_requester(&self, engine: &Engine, reservation: &Reservation) {
        let Some(requester) = engine.get_user(&reservation.requester).await else {
            warn!("{}: requester {} is gone, not mailing", reservation.id, reservation.requester);
            return;
        };
        let facility_name = engine
            .facility_name(&reservation.facility)
            .await
            .unwrap_or_else(|| reservation.facility.clone());
        let recipient = format!("{} {}", requester.first_name, requester.last_name);
        if let Some(mail) = mailer::status_notice(reservation, &facility_name, &recipient, &requester.email) {
            self.state.mailer.dispatch(mail);
        }
    }
}

// ── Result rows ──────────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

/// Result columns per table. `SELECT * FROM users` adds the unpaginated match count.
fn columns(table: &str, returning: bool) -> Vec<FieldInfo> {
    match table {
        "facilities" => vec![text("code"), text("name")],
        "users" => {
            let mut cols = vec![
                text("id"),
                text("first_name"),
                text("last_name"),
                text("role"),
                text("email"),
                int8("created_at"),
            ];
            if !returning {
                cols.push(int8("total"));
            }
            cols
        }
        "reservations" => vec![
            text("id"),
            text("facility"),
            text("date"),
            text("time_start"),
            text("time_end"),
            text("title"),
            text("requester"),
            text("status"),
            int8("created_at"),
        ],
        "manual_events" => vec![
            text("id"),
            text("facility"),
            text("date"),
            text("time_start"),
            text("time_end"),
            text("title"),
            text("created_by"),
            int8("created_at"),
        ],
        "activity_logs" => vec![
            text("id"),
            text("user_id"),
            text("action"),
            text("ip_address"),
            int8("timestamp"),
        ],
        "calendar" | "conflicts" => vec![
            text("date"),
            text("facility"),
            text("time_start"),
            text("time_end"),
            text("title"),
            text("source"),
            text("source_id"),
        ],
        "sessions" => vec![text("user_id"), text("user_name"), text("role")],
        _ => vec![],
    }
}

fn schema(table: &str, returning: bool) -> Arc<Vec<FieldInfo>> {
    Arc::new(columns(table, returning))
}

fn described_columns(sql: &str) -> Vec<FieldInfo> {
    match sql::result_source(sql) {
        Some(ResultSource { table, returning }) => columns(table, returning),
        None => vec![],
    }
}

fn rows<T>(
    schema: Arc<Vec<FieldInfo>>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

/// `INSERT n`, or the inserted rows when the statement asked for `RETURNING`.
fn inserted<T>(
    returning: bool,
    table: &str,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    if returning {
        return rows(schema(table, true), items, encode);
    }
    let count = items.into_iter().count();
    Response::Execution(Tag::new("INSERT").with_rows(count))
}

fn encode_facility(enc: &mut DataRowEncoder, f: FacilityInfo) -> PgWireResult<()> {
    enc.encode_field(&f.code)?;
    enc.encode_field(&f.name)
}

fn encode_user(enc: &mut DataRowEncoder, u: UserInfo) -> PgWireResult<()> {
    enc.encode_field(&u.id)?;
    enc.encode_field(&u.first_name)?;
    enc.encode_field(&u.last_name)?;
    enc.encode_field(&u.role.as_str())?;
    enc.encode_field(&u.email)?;
    enc.encode_field(&u.created_at)
}

fn encode_reservation(enc: &mut DataRowEncoder, r: Reservation) -> PgWireResult<()> {
    enc.encode_field(&r.id)?;
    enc.encode_field(&r.facility)?;
    enc.encode_field(&r.date.to_string())?;
    enc.encode_field(&r.span.start_time().to_string())?;
    enc.encode_field(&r.span.end_time().to_string())?;
    enc.encode_field(&r.title)?;
    enc.encode_field(&r.requester)?;
    enc.encode_field(&r.status.as_str())?;
    enc.encode_field(&r.created_at)
}

fn encode_manual_event(enc: &mut DataRowEncoder, e: ManualEvent) -> PgWireResult<()> {
    enc.encode_field(&e.id.to_string())?;
    enc.encode_field(&e.facility)?;
    enc.encode_field(&e.date.to_string())?;
    enc.encode_field(&e.span.start_time().to_string())?;
    enc.encode_field(&e.span.end_time().to_string())?;
    enc.encode_field(&e.title)?;
    enc.encode_field(&e.created_by)?;
    enc.encode_field(&e.created_at)
}

fn encode_activity(enc: &mut DataRowEncoder, log: ActivityLog) -> PgWireResult<()> {
    enc.encode_field(&log.id.to_string())?;
    enc.encode_field(&log.user_id)?;
    enc.encode_field(&log.action)?;
    enc.encode_field(&log.ip_address)?;
    enc.encode_field(&log.timestamp)
}

fn encode_calendar_entry(
    enc: &mut DataRowEncoder,
    (date, entry): (chrono::NaiveDate, CalendarEntry),
) -> PgWireResult<()> {
    enc.encode_field(&date.to_string())?;
    enc.encode_field(&entry.facility)?;
    enc.encode_field(&entry.span.start_time().to_string())?;
    enc.encode_field(&entry.span.end_time().to_string())?;
    enc.encode_field(&entry.title)?;
    enc.encode_field(&entry.source.kind())?;
    enc.encode_field(&entry.source.id())
}

#[async_trait]
impl SimpleQueryHandler for HallbookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, sql::parse_sql(query)).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct HallbookQueryParser;

#[async_trait]
impl QueryParser for HallbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; sql::placeholder_count(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(described_columns(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for HallbookHandler {
    type Statement = String;
    type QueryParser = HallbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let params: Vec<Option<String>> = portal
            .parameters
            .iter()
            .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
            .collect();
        self.run(client, sql::parse_bound(&portal.statement.statement, &params))
            .await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; sql::placeholder_count(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            described_columns(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(described_columns(&target.statement.statement)))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct HallbookFactory {
    handler: Arc<HallbookHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<ApiKeyAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl HallbookFactory {
    pub fn new(state: Arc<ServerState>, peer: SocketAddr) -> Self {
        let auth_source = ApiKeyAuthSource::new(state.api_key.clone());
        Self {
            handler: Arc::new(HallbookHandler::new(state, peer)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HallbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = HallbookFactory::new(state, peer);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Conflict { .. } => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::NotFound(_) => "02000",
        EngineError::Validation(_) => "22023",
        EngineError::Authentication => "28P01",
        EngineError::Forbidden(_) => "42501",
        EngineError::InvalidTransition { .. }
        | EngineError::HasBookings(_)
        | EngineError::LimitExceeded(_)
        | EngineError::WalError(_)
        | EngineError::Internal(_) => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if matches!(e, EngineError::Conflict { .. }) {
        metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
    }
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::InvalidValue { .. } => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_per_error_kind() {
        assert_eq!(engine_sqlstate(&EngineError::Conflict { with: "R-001".into() }), "23P01");
        assert_eq!(engine_sqlstate(&EngineError::AlreadyExists("a@b.co".into())), "23505");
        assert_eq!(engine_sqlstate(&EngineError::NotFound("R-009".into())), "02000");
        assert_eq!(engine_sqlstate(&EngineError::Validation("empty title".into())), "22023");
        assert_eq!(engine_sqlstate(&EngineError::Authentication), "28P01");
        assert_eq!(engine_sqlstate(&EngineError::Forbidden("self-delete")), "42501");
        assert_eq!(engine_sqlstate(&EngineError::HasBookings("PH-001".into())), "P0001");
    }

    #[test]
    fn user_columns_depend_on_shape() {
        assert_eq!(columns("users", false).len(), 7);
        assert_eq!(columns("users", true).len(), 6);
        assert!(described_columns("DELETE FROM users WHERE id = $1").is_empty());
        assert_eq!(described_columns("SELECT * FROM sessions WHERE email = $1 AND password = $2").len(), 3);
    }
}
