use std::time::Duration;

use reqwest::Url;
use serde::{Serialize, de::DeserializeOwned};
use timeboost_types::Round;
use timeboost_types::rpc::ErrorBody;

use crate::ClientError;

static USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// JSON over HTTP access to a bid validator or sequencer.
#[derive(Debug, Clone)]
pub struct HttpClient {
    base: Url,
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub(crate) async fn get<A>(&self, path: &str) -> Result<A, ClientError>
    where
        A: DeserializeOwned,
    {
        let url = self.base.join(path)?;
        let res = self.client.get(url).send().await?;
        Self::decode(res).await
    }

    pub(crate) async fn post<A, B>(&self, path: &str, a: &A) -> Result<B, ClientError>
    where
        A: Serialize,
        B: DeserializeOwned,
    {
        let url = self.base.join(path)?;
        let res = self.client.post(url).json(a).send().await?;
        Self::decode(res).await
    }

    /// Like `post` but with a request timeout exceeding `wait`.
    pub(crate) async fn post_waiting<A, B>(
        &self,
        path: &str,
        a: &A,
        wait: Duration,
    ) -> Result<B, ClientError>
    where
        A: Serialize,
        B: DeserializeOwned,
    {
        let url = self.base.join(path)?;
        let res = self
            .client
            .post(url)
            .timeout(wait + Duration::from_secs(1))
            .json(a)
            .send()
            .await?;
        Self::decode(res).await
    }

    async fn decode<A>(res: reqwest::Response) -> Result<A, ClientError>
    where
        A: DeserializeOwned,
    {
        let status = res.status();
        if status.is_success() {
            return Ok(res.json().await?);
        }
        match res.json::<ErrorBody>().await {
            Ok(body) => Err(ClientError::rejected(&body.code, body.message)),
            Err(_) => Err(ClientError::Status(status)),
        }
    }

    /// The recorded outcome of an auction round, if resolved.
    pub async fn resolution(
        &self,
        r: Round,
    ) -> Result<Option<timeboost_types::RoundOutcome>, ClientError> {
        match self.get(&format!("v1/resolution/{r}")).await {
            Ok(o) => Ok(Some(o)),
            Err(ClientError::Rejected { code, .. }) if code == "not-found" => Ok(None),
            Err(e) => Err(e),
        }
    }
}
