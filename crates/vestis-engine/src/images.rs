use std::collections::VecDeque;
use std::sync::{mpsc, Mutex};
use std::thread;

use anyhow::Context;
use image::ImageFormat;
use indexmap::IndexMap;
use reqwest::blocking::Client as HttpClient;
use reqwest::Url;
use thiserror::Error;
use vestis_contracts::search::{ResultItem, SearchResponse};

use crate::config::GatewayConfig;

pub const NO_IMAGE_LABEL: &str = "No Image";
pub const NO_DESCRIPTION_LABEL: &str = "No description";
pub const NO_RESULTS_LABEL: &str = "No results";

const MAX_IMAGE_WORKERS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLoadState {
    NotRequested,
    Loading,
    Loaded,
    Broken,
}

impl ImageLoadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Loaded | Self::Broken)
    }
}

/// What a result card shows in its image slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardImage {
    Skeleton,
    Image(String),
    Placeholder,
}

/// `{origin}/api/image?path=<url-encoded path>`.
pub fn image_url(origin: &str, image_path: &str) -> Option<String> {
    let mut url = Url::parse(&format!("{}/api/image", origin.trim_end_matches('/'))).ok()?;
    url.query_pairs_mut().append_pair("path", image_path);
    Some(url.to_string())
}

/// Scores always carry exactly two decimals; exact ties round away from zero.
pub fn format_score(score: f64) -> String {
    format!("{:.2}", (score * 100.0).round() / 100.0)
}

/// Image load lifecycle for one rendered result.
///
/// Items without a usable image path start (and stay) `Broken` and never pass
/// through `Loading`. `Loaded` and `Broken` are terminal; late or duplicate
/// events are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultImageLoader {
    url: Option<String>,
    state: ImageLoadState,
}

impl ResultImageLoader {
    pub fn new(origin: &str, image_path: Option<&str>) -> Self {
        let url = image_path.and_then(|path| image_url(origin, path));
        let state = if url.is_some() {
            ImageLoadState::NotRequested
        } else {
            ImageLoadState::Broken
        };
        Self { url, state }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn state(&self) -> ImageLoadState {
        self.state
    }

    /// Hands out the URL to fetch and moves to `Loading`; `None` once requested.
    pub fn request(&mut self) -> Option<String> {
        if self.state != ImageLoadState::NotRequested {
            return None;
        }
        let url = self.url.clone()?;
        self.state = ImageLoadState::Loading;
        Some(url)
    }

    pub fn mark_loaded(&mut self) -> bool {
        self.finish(ImageLoadState::Loaded)
    }

    pub fn mark_failed(&mut self) -> bool {
        self.finish(ImageLoadState::Broken)
    }

    fn finish(&mut self, next: ImageLoadState) -> bool {
        if self.state != ImageLoadState::Loading {
            return false;
        }
        self.state = next;
        true
    }

    pub fn view(&self) -> CardImage {
        match (self.state, self.url.as_ref()) {
            (ImageLoadState::Loaded, Some(url)) => CardImage::Image(url.clone()),
            (ImageLoadState::NotRequested | ImageLoadState::Loading, Some(_)) => {
                CardImage::Skeleton
            }
            _ => CardImage::Placeholder,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultCard {
    item: ResultItem,
    loader: ResultImageLoader,
}

impl ResultCard {
    pub fn new(item: ResultItem, origin: &str) -> Self {
        let loader = ResultImageLoader::new(origin, item.image_path());
        Self { item, loader }
    }

    pub fn product_id(&self) -> &str {
        &self.item.product_id
    }

    pub fn item(&self) -> &ResultItem {
        &self.item
    }

    pub fn loader(&self) -> &ResultImageLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut ResultImageLoader {
        &mut self.loader
    }

    pub fn score_label(&self) -> String {
        format_score(self.item.score)
    }

    pub fn description_label(&self) -> &str {
        self.item
            .description
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(NO_DESCRIPTION_LABEL)
    }

    pub fn image_path_line(&self) -> Option<&str> {
        self.item.image_path()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub product_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOutcome {
    pub product_id: String,
    pub state: ImageLoadState,
    pub error: Option<String>,
}

/// Cards for one response, keyed by product id in display order.
///
/// Built fresh for every ready response; dropping the grid drops every
/// loader with it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultGrid {
    cards: IndexMap<String, ResultCard>,
}

impl ResultGrid {
    pub fn from_response(response: &SearchResponse, origin: &str) -> Self {
        let cards = response
            .results
            .iter()
            .map(|item| (item.product_id.clone(), ResultCard::new(item.clone(), origin)))
            .collect();
        Self { cards }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn empty_state(&self) -> Option<&'static str> {
        self.is_empty().then_some(NO_RESULTS_LABEL)
    }

    pub fn cards(&self) -> impl Iterator<Item = &ResultCard> {
        self.cards.values()
    }

    pub fn card(&self, product_id: &str) -> Option<&ResultCard> {
        self.cards.get(product_id)
    }

    /// Moves every not-yet-requested card to `Loading` and returns what to fetch.
    pub fn request_images(&mut self) -> Vec<ImageRequest> {
        self.cards
            .values_mut()
            .filter_map(|card| {
                let url = card.loader.request()?;
                Some(ImageRequest {
                    product_id: card.item.product_id.clone(),
                    url,
                })
            })
            .collect()
    }

    /// Applies one fetch result. Unknown ids are ignored.
    pub fn resolve_image(&mut self, product_id: &str, loaded: bool) -> Option<ImageLoadState> {
        let card = self.cards.get_mut(product_id)?;
        if loaded {
            card.loader.mark_loaded();
        } else {
            card.loader.mark_failed();
        }
        Some(card.loader.state())
    }
}

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub format: ImageFormat,
}

#[derive(Debug, Error)]
pub enum ImageFetchError {
    #[error("image request failed: {0}")]
    Transport(String),
    #[error("image request returned status {0}")]
    Status(u16),
    #[error("image payload is not a recognised image: {0}")]
    Undecodable(String),
}

pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage, ImageFetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    http: HttpClient,
}

impl HttpImageFetcher {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.image_timeout)
            .build()
            .context("failed to build image HTTP client")?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: HttpClient) -> Self {
        Self { http }
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage, ImageFetchError> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| ImageFetchError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageFetchError::Status(status.as_u16()));
        }
        let bytes = response
            .bytes()
            .map_err(|err| ImageFetchError::Transport(err.to_string()))?
            .to_vec();
        let format =
            image::guess_format(&bytes).map_err(|err| ImageFetchError::Undecodable(err.to_string()))?;
        Ok(FetchedImage { bytes, format })
    }
}

/// Fetches every pending image in `grid` on a small worker pool and applies
/// each result as it arrives. One card failing never touches another.
pub fn load_images<F>(grid: &mut ResultGrid, fetcher: &F) -> Vec<ImageOutcome>
where
    F: ImageFetcher + Sync,
{
    let requests = grid.request_images();
    if requests.is_empty() {
        return Vec::new();
    }
    let workers = requests.len().min(MAX_IMAGE_WORKERS);
    let queue = Mutex::new(requests.into_iter().collect::<VecDeque<_>>());
    let (tx, rx) = mpsc::channel::<(String, Result<FetchedImage, ImageFetchError>)>();
    let mut outcomes = Vec::new();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            scope.spawn(move || loop {
                let next = match queue.lock() {
                    Ok(mut pending) => pending.pop_front(),
                    Err(_) => None,
                };
                let Some(request) = next else {
                    break;
                };
                let result = fetcher.fetch(&request.url);
                if tx.send((request.product_id, result)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        for (product_id, result) in rx {
            let error = result.as_ref().err().map(ToString::to_string);
            if let Some(state) = grid.resolve_image(&product_id, result.is_ok()) {
                outcomes.push(ImageOutcome {
                    product_id,
                    state,
                    error,
                });
            }
        }
    });

    outcomes
}
