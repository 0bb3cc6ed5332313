use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use futures::future::join_all;
use shared::{
    color,
    domain::{DeviceId, DeviceSummary, PatternEntry, Rgb},
    protocol::{set_variable_args, PATTERN_INDEX, SET_VARIABLE_FUNCTION},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    patterns::PatternListLoader,
    protocol_client::{read_value, CursorProtocol, RetryPolicy, VARIABLE_CURSOR},
    session::{RequestTag, Session, SessionUpdate, Slot, UpdateSource, MISSING_TOKEN_STATUS},
    transport::DeviceTransport,
    types::{saturate_i32, AccessToken, Field, ReadSource},
};

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Updated(Box<Session>),
    /// Status text of an intermediate step that does not change the session.
    Progress {
        device: DeviceId,
        generation: u64,
        message: String,
    },
    StaleResponseDiscarded { device: DeviceId, generation: u64 },
}

/// Picks the last used device when it is still listed, otherwise the first one.
pub fn choose_device<'a>(
    devices: &'a [DeviceSummary],
    preferred: Option<&DeviceId>,
) -> Option<&'a DeviceSummary> {
    preferred
        .and_then(|id| devices.iter().find(|device| &device.id == id))
        .or_else(|| devices.first())
}

struct RequestContext {
    tag: RequestTag,
    token: AccessToken,
}

/// Owns the [`Session`] of the selected device. Every change goes through a
/// completed round-trip and [`Session::applied`].
pub struct DeviceSessionController {
    transport: Arc<dyn DeviceTransport>,
    protocol: Arc<CursorProtocol>,
    patterns: PatternListLoader,
    session: Mutex<Session>,
    /// Mirror of `Session::generation` for callbacks that cannot lock the session.
    generation: Arc<AtomicU64>,
    events: broadcast::Sender<SessionEvent>,
}

impl DeviceSessionController {
    pub fn new(transport: Arc<dyn DeviceTransport>) -> Arc<Self> {
        Self::with_retry_policy(transport, RetryPolicy::default())
    }

    pub fn with_retry_policy(transport: Arc<dyn DeviceTransport>, retry: RetryPolicy) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let protocol = Arc::new(CursorProtocol::new(Arc::clone(&transport), retry));
        Arc::new(Self {
            transport,
            patterns: PatternListLoader::new(Arc::clone(&protocol)),
            protocol,
            session: Mutex::new(Session::default()),
            generation: Arc::new(AtomicU64::new(0)),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> Session {
        self.session.lock().await.clone()
    }

    pub async fn set_access_token(&self, token: AccessToken) {
        let mut session = self.session.lock().await;
        *session = session.with_access_token(token);
        self.publish(&session);
    }

    pub async fn discover_devices(&self) -> Result<Vec<DeviceSummary>, ClientError> {
        let token = self.session.lock().await.access_token.clone();
        let Some(token) = token else {
            self.report(MISSING_TOKEN_STATUS).await;
            return Err(ClientError::MissingToken);
        };

        self.report("Getting devices...").await;
        match self.transport.list_devices(&token).await {
            Ok(devices) => {
                info!("devices: listed count={}", devices.len());
                self.report("Loaded devices").await;
                Ok(devices)
            }
            Err(err) => {
                warn!("devices: listing failed: {err}");
                self.report(err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Reads every field, the pattern list and the active pattern of `device`.
    ///
    /// Each value lands in the session as soon as it arrives; a failure only
    /// marks its own slot. Returns the session once all reads have settled.
    pub async fn connect(&self, device: DeviceSummary) -> Session {
        let ctx = match self.begin(device).await {
            Ok(ctx) => ctx,
            Err(_) => return self.snapshot().await,
        };
        info!(
            "session: connecting device={} generation={}",
            ctx.tag.device, ctx.tag.generation
        );

        self.apply(&ctx.tag, SessionUpdate::Started).await;
        let field_reads = join_all(Field::ALL.iter().map(|field| self.load_field(&ctx, *field)));
        let (fields, patterns) = futures::join!(field_reads, self.load_patterns(&ctx));
        self.apply(&ctx.tag, SessionUpdate::Finished).await;

        let failed = fields.iter().filter(|result| result.is_err()).count();
        if failed > 0 || patterns.is_err() {
            warn!(
                "session: connect finished with failures device={} fields_failed={failed} patterns_ok={}",
                ctx.tag.device,
                patterns.is_ok()
            );
        } else {
            info!("session: connected device={}", ctx.tag.device);
        }

        self.snapshot().await
    }

    /// Selects `device` without reading anything from it, so single values
    /// can be refreshed or written without a full [`connect`](Self::connect).
    pub async fn attach(&self, device: DeviceSummary) -> Result<(), ClientError> {
        let ctx = self.begin(device).await?;
        info!(
            "session: attached device={} generation={}",
            ctx.tag.device, ctx.tag.generation
        );
        Ok(())
    }

    /// Forgets the device; responses still in flight are ignored when they land.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(device) = &session.device {
            info!("session: disconnect device={}", device.id);
        }
        *session = session.disconnected();
        self.generation.store(session.generation, Ordering::Release);
        self.publish(&session);
    }

    pub async fn refresh_field(&self, field: Field) -> Result<i64, ClientError> {
        let ctx = self.request_context().await?;
        self.apply(&ctx.tag, SessionUpdate::Started).await;
        let result = self.load_field(&ctx, field).await;
        self.apply(&ctx.tag, SessionUpdate::Finished).await;
        result
    }

    pub async fn refresh_patterns(&self) -> Result<Vec<PatternEntry>, ClientError> {
        let ctx = self.request_context().await?;
        self.apply(&ctx.tag, SessionUpdate::Started).await;
        let result = self.load_patterns(&ctx).await;
        self.apply(&ctx.tag, SessionUpdate::Finished).await;
        result
    }

    /// Writes `desired` and stores whatever value the device echoes back.
    pub async fn set_field(&self, field: Field, desired: i64) -> Result<i64, ClientError> {
        let ctx = self.request_context().await?;
        self.apply(&ctx.tag, SessionUpdate::Started).await;

        let args = set_variable_args(field.set_key(), desired);
        debug!("session: set device={} args={args}", ctx.tag.device);
        let result = self
            .transport
            .invoke_function(&ctx.token, &ctx.tag.device, SET_VARIABLE_FUNCTION, &args)
            .await;
        if let Ok(echoed) = &result {
            if *echoed != desired {
                info!("session: device adjusted {field} requested={desired} echoed={echoed}");
            }
        }
        let result = self
            .settle(&ctx.tag, Slot::Field(field), result, |value| {
                SessionUpdate::Field {
                    field,
                    value: *value,
                    source: UpdateSource::Confirmed,
                }
            })
            .await;

        self.apply(&ctx.tag, SessionUpdate::Finished).await;
        result
    }

    /// Sends the three channels of `hex` as independent writes.
    pub async fn set_color(&self, hex: &str) -> Result<Rgb, ClientError> {
        let rgb = match color::parse_hex(hex) {
            Ok(rgb) => rgb,
            Err(err) => {
                let err = ClientError::from(err);
                self.report(err.to_string()).await;
                return Err(err);
            }
        };

        let (r, g, b) = futures::join!(
            self.set_field(Field::Red, i64::from(rgb.r)),
            self.set_field(Field::Green, i64::from(rgb.g)),
            self.set_field(Field::Blue, i64::from(rgb.b)),
        );
        Ok(Rgb::new(
            saturate_i32(r?),
            saturate_i32(g?),
            saturate_i32(b?),
        ))
    }

    pub async fn toggle_power(&self) -> Result<bool, ClientError> {
        self.toggle(Field::Power).await
    }

    pub async fn toggle_clock_orientation(&self) -> Result<bool, ClientError> {
        self.toggle(Field::ClockOrientation).await
    }

    /// Makes pattern `index` the active one. The device echoes the index it
    /// switched to; a negative echo means it refused.
    pub async fn set_pattern(&self, index: u32) -> Result<u32, ClientError> {
        let ctx = self.request_context().await?;
        {
            let session = self.session.lock().await;
            if !session.patterns.is_empty()
                && !session.patterns.iter().any(|entry| entry.index == index)
            {
                return Err(ClientError::UnknownPattern(index.to_string()));
            }
        }

        self.apply(&ctx.tag, SessionUpdate::Started).await;
        let result = self
            .transport
            .invoke_function(&ctx.token, &ctx.tag.device, PATTERN_INDEX, &index.to_string())
            .await
            .and_then(|echoed| {
                u32::try_from(echoed).map_err(|_| ClientError::Rejected {
                    function: PATTERN_INDEX.to_string(),
                    value: echoed,
                })
            });
        let result = self
            .settle(&ctx.tag, Slot::ActivePattern, result, |index| {
                SessionUpdate::ActivePattern {
                    index: *index,
                    source: UpdateSource::Confirmed,
                }
            })
            .await;
        self.apply(&ctx.tag, SessionUpdate::Finished).await;
        result
    }

    pub async fn set_pattern_by_name(&self, name: &str) -> Result<u32, ClientError> {
        let index = {
            let session = self.session.lock().await;
            session.pattern_by_name(name).map(|entry| entry.index)
        };
        match index {
            Some(index) => self.set_pattern(index).await,
            None => Err(ClientError::UnknownPattern(name.to_string())),
        }
    }

    /// Starts a new generation for `device`.
    async fn begin(&self, device: DeviceSummary) -> Result<RequestContext, ClientError> {
        let mut session = self.session.lock().await;
        let Some(token) = session.access_token.clone() else {
            *session = session.applied(SessionUpdate::Status(MISSING_TOKEN_STATUS.into()));
            self.publish(&session);
            return Err(ClientError::MissingToken);
        };
        *session = session.connecting(device);
        self.generation.store(session.generation, Ordering::Release);
        self.publish(&session);
        let tag = session.tag().ok_or(ClientError::NotConnected)?;
        Ok(RequestContext { tag, token })
    }

    async fn toggle(&self, field: Field) -> Result<bool, ClientError> {
        let current = self.session.lock().await.field_value(field) != 0;
        let confirmed = self.set_field(field, i64::from(!current)).await?;
        Ok(confirmed != 0)
    }

    async fn load_field(&self, ctx: &RequestContext, field: Field) -> Result<i64, ClientError> {
        let result = match field.read_source() {
            ReadSource::Variable(variable) => {
                read_value::<i64>(
                    self.transport.as_ref(),
                    &ctx.token,
                    &ctx.tag.device,
                    variable,
                )
                .await
            }
            ReadSource::Cursor(name) => {
                self.protocol
                    .fetch_named::<i64>(&ctx.token, &ctx.tag.device, VARIABLE_CURSOR, name)
                    .await
            }
        };
        self.settle(&ctx.tag, Slot::Field(field), result, |value| {
            SessionUpdate::Field {
                field,
                value: *value,
                source: UpdateSource::Loaded,
            }
        })
        .await
    }

    /// Loads the full list, then the active index once the list is in place.
    async fn load_patterns(&self, ctx: &RequestContext) -> Result<Vec<PatternEntry>, ClientError> {
        let events = self.events.clone();
        let current = Arc::clone(&self.generation);
        let tag = ctx.tag.clone();
        let list = self
            .patterns
            .load_all_observed(&ctx.token, &ctx.tag.device, move |progress| {
                if current.load(Ordering::Acquire) != tag.generation {
                    debug!(
                        "session: dropping stale progress device={} generation={}",
                        tag.device, tag.generation
                    );
                    return;
                }
                let _ = events.send(SessionEvent::Progress {
                    device: tag.device.clone(),
                    generation: tag.generation,
                    message: progress.status_text(),
                });
            })
            .await;
        let list = self
            .settle(&ctx.tag, Slot::PatternList, list, |patterns| {
                SessionUpdate::Patterns(patterns.clone())
            })
            .await?;

        let active = read_value::<i64>(
            self.transport.as_ref(),
            &ctx.token,
            &ctx.tag.device,
            PATTERN_INDEX,
        )
        .await
        .and_then(|index| {
            u32::try_from(index).map_err(|_| {
                ClientError::Decode(format!("pattern index {index} out of range"))
            })
        });
        self.settle(&ctx.tag, Slot::ActivePattern, active, |index| {
            SessionUpdate::ActivePattern {
                index: *index,
                source: UpdateSource::Loaded,
            }
        })
        .await?;

        Ok(list)
    }

    /// Applies the outcome of one round-trip to its slot and hands it back.
    async fn settle<T>(
        &self,
        tag: &RequestTag,
        slot: Slot,
        result: Result<T, ClientError>,
        on_success: impl FnOnce(&T) -> SessionUpdate,
    ) -> Result<T, ClientError> {
        match &result {
            Ok(value) => {
                self.apply(tag, on_success(value)).await;
            }
            Err(err) => {
                warn!("session: {slot:?} failed device={}: {err}", tag.device);
                self.apply(
                    tag,
                    SessionUpdate::Failed {
                        slot,
                        message: err.to_string(),
                    },
                )
                .await;
            }
        }
        result
    }

    /// Returns false when the session moved on since `tag` was issued.
    async fn apply(&self, tag: &RequestTag, update: SessionUpdate) -> bool {
        let mut session = self.session.lock().await;
        if !session.accepts(tag) {
            debug!(
                "session: discarding stale update device={} generation={}",
                tag.device, tag.generation
            );
            let _ = self.events.send(SessionEvent::StaleResponseDiscarded {
                device: tag.device.clone(),
                generation: tag.generation,
            });
            return false;
        }
        *session = session.applied(update);
        self.publish(&session);
        true
    }

    async fn report(&self, message: impl Into<String>) {
        let mut session = self.session.lock().await;
        *session = session.applied(SessionUpdate::Status(message.into()));
        self.publish(&session);
    }

    async fn request_context(&self) -> Result<RequestContext, ClientError> {
        let err = {
            let session = self.session.lock().await;
            match (session.access_token.clone(), session.tag()) {
                (Some(token), Some(tag)) => return Ok(RequestContext { tag, token }),
                (None, _) => ClientError::MissingToken,
                (Some(_), None) => ClientError::NotConnected,
            }
        };
        self.report(err.to_string()).await;
        Err(err)
    }

    fn publish(&self, session: &Session) {
        let _ = self
            .events
            .send(SessionEvent::Updated(Box::new(session.clone())));
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
