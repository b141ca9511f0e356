//! Outbound notifications, decoupled from request latency.
//!
//! Flows enqueue a [`Message`] on an unbounded channel and move on; a
//! background worker drains the channel and hands each message to a
//! [`Notifier`]. Delivery failures are retried with exponential backoff
//! and then logged, never surfaced to the request that queued them: the
//! code stays stored either way and the user can still enter it if it
//! reached them out-of-band.
//!
//! The default for local development is [`LogNotifier`], which records
//! recipient and subject only. Message bodies carry plaintext codes and
//! never appear in logs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info};

const DELIVERY_MAX_ATTEMPTS: u32 = 3;
const DELIVERY_BACKOFF_BASE: Duration = Duration::from_secs(2);
const DELIVERY_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// One outbound notification.
#[derive(Clone, Debug)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivery abstraction used by the worker.
pub trait Notifier: Send + Sync {
    /// Deliver a message or return an error so the worker retries it.
    ///
    /// # Errors
    ///
    /// Returns an error when delivery fails.
    fn send(&self, message: &Message) -> Result<()>;
}

/// Local dev notifier that logs instead of sending real mail.
#[derive(Clone, Debug)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, message: &Message) -> Result<()> {
        // Recipient and subject only; the body carries the code.
        info!(to = %message.to, subject = %message.subject, "notifier send stub");
        Ok(())
    }
}

/// SMTP relay settings from the CLI.
#[derive(Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from: String,
}

/// Relay-backed notifier (rustls, optional credentials).
pub struct SmtpNotifier {
    mailer: SmtpTransport,
    from: Mailbox,
}

impl SmtpNotifier {
    /// # Errors
    ///
    /// Returns an error if the relay or the from address is invalid.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = SmtpTransport::relay(&config.host)
            .with_context(|| format!("invalid SMTP relay host: {}", config.host))?
            .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        let from = config
            .from
            .parse()
            .with_context(|| format!("invalid from address: {}", config.from))?;

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, message: &Message) -> Result<()> {
        let email = lettre::Message::builder()
            .from(self.from.clone())
            .to(message
                .to
                .parse()
                .with_context(|| format!("invalid recipient address: {}", message.to))?)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .context("failed to build message")?;

        self.mailer.send(&email).context("smtp delivery failed")?;

        Ok(())
    }
}

/// Spawn the delivery worker and return the sender the flows enqueue on.
///
/// The worker exits when every sender is dropped.
pub fn spawn_delivery_worker(
    notifier: Arc<dyn Notifier>,
) -> (mpsc::UnboundedSender<Message>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            deliver_with_retry(notifier.as_ref(), &message).await;
        }
        debug!("notification channel closed, worker exiting");
    });

    (tx, handle)
}

async fn deliver_with_retry(notifier: &dyn Notifier, message: &Message) {
    for attempt in 1..=DELIVERY_MAX_ATTEMPTS {
        match notifier.send(message) {
            Ok(()) => {
                if attempt > 1 {
                    debug!(to = %message.to, attempt, "delivery succeeded after retry");
                }
                return;
            }
            Err(err) => {
                error!(to = %message.to, subject = %message.subject, attempt, "delivery failed: {err}");
                if attempt < DELIVERY_MAX_ATTEMPTS {
                    sleep(backoff_delay(attempt)).await;
                }
            }
        }
    }
    error!(to = %message.to, subject = %message.subject, "giving up on delivery");
}

fn backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = DELIVERY_BACKOFF_BASE
        .checked_mul(factor)
        .unwrap_or(DELIVERY_BACKOFF_MAX);
    delay.min(DELIVERY_BACKOFF_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyNotifier {
        failures_left: AtomicU32,
        delivered: Mutex<Vec<Message>>,
    }

    impl FlakyNotifier {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    impl Notifier for FlakyNotifier {
        fn send(&self, message: &Message) -> Result<()> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("relay refused the connection");
            }
            self.delivered.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn message() -> Message {
        Message {
            to: "a@example.com".to_string(),
            subject: "subject".to_string(),
            body: "body".to_string(),
        }
    }

    #[test]
    fn log_notifier_always_succeeds() {
        assert!(LogNotifier.send(&message()).is_ok());
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(31), DELIVERY_BACKOFF_MAX);
    }

    #[tokio::test]
    async fn worker_delivers_queued_messages() {
        let notifier = Arc::new(FlakyNotifier::new(0));
        let (tx, handle) = spawn_delivery_worker(notifier.clone());

        tx.send(message()).unwrap();
        tx.send(message()).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(notifier.delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_retries_transient_failures() {
        let notifier = Arc::new(FlakyNotifier::new(2));
        let (tx, handle) = spawn_delivery_worker(notifier.clone());

        tx.send(message()).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(notifier.delivered.lock().unwrap().len(), 1);
        assert_eq!(notifier.failures_left.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn worker_gives_up_after_max_attempts() {
        let notifier = Arc::new(FlakyNotifier::new(u32::MAX));
        let (tx, handle) = spawn_delivery_worker(notifier.clone());

        tx.send(message()).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(notifier.delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn smtp_notifier_rejects_bad_from_address() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: None,
            password: None,
            from: "not an address".to_string(),
        };
        assert!(SmtpNotifier::new(&config).is_err());
    }
}
