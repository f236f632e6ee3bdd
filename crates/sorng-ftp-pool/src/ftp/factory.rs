//! Connection factory: the pool's only way to make, check and dispose of
//! connections.

use crate::ftp::client::FtpConnection;
use crate::ftp::error::FtpResult;
use crate::ftp::session::FtpSession;
use crate::ftp::types::FtpConnectionConfig;
use std::sync::Arc;

/// Creates, validates and destroys pooled connections.
///
/// `validate` and `destroy` never fail: a broken connection is simply
/// reported invalid, and destruction always releases the socket.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn create(&self) -> FtpResult<Self::Connection>;

    async fn validate(&self, conn: &mut Self::Connection) -> bool;

    async fn destroy(&self, conn: Self::Connection);
}

/// `validate` / `destroy` semantics shared by every [`FtpSession`]-backed
/// factory.
pub async fn validate_session<S: FtpSession + ?Sized>(conn: &mut S) -> bool {
    if !conn.is_connected() {
        return false;
    }
    match conn.noop().await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("FTP connection failed validation: {}", e);
            false
        }
    }
}

pub async fn destroy_session<S: FtpSession + ?Sized>(conn: &mut S) {
    if conn.is_connected() {
        if let Err(e) = conn.logout().await {
            log::warn!("FTP logout failed, closing anyway: {}", e);
        }
    }
    conn.disconnect().await;
}

/// Factory producing real TCP [`FtpConnection`]s.
pub struct FtpConnectionFactory {
    config: Arc<FtpConnectionConfig>,
}

impl FtpConnectionFactory {
    pub fn new(config: FtpConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &FtpConnectionConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl ConnectionFactory for FtpConnectionFactory {
    type Connection = FtpConnection;

    async fn create(&self) -> FtpResult<FtpConnection> {
        let conn = FtpConnection::open(Arc::clone(&self.config)).await?;
        log::debug!(
            "FTP connection {} opened to {}:{}",
            conn.id,
            self.config.host,
            self.config.port
        );
        Ok(conn)
    }

    async fn validate(&self, conn: &mut FtpConnection) -> bool {
        validate_session(conn).await
    }

    async fn destroy(&self, mut conn: FtpConnection) {
        destroy_session(&mut conn).await;
        log::debug!("FTP connection {} closed ({})", conn.id, conn.info.summary());
    }
}
