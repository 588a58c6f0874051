mod config;
mod gateway;
mod images;
mod session;

pub use config::{normalize_origin, GatewayConfig, DEFAULT_BACKEND_ORIGIN};
pub use gateway::{
    search_form_fields, truncate_text, FormField, GatewayError, HttpGateway, SearchGateway,
    ERROR_BODY_MAX_CHARS,
};
pub use images::{
    format_score, image_url, load_images, CardImage, FetchedImage, HttpImageFetcher,
    ImageFetchError, ImageFetcher, ImageLoadState, ImageOutcome, ImageRequest, ResultCard,
    ResultGrid, ResultImageLoader, NO_DESCRIPTION_LABEL, NO_IMAGE_LABEL, NO_RESULTS_LABEL,
};
pub use session::{
    PendingSearch, Resolution, SearchSession, SessionState, SubmitOutcome, FIRST_SEARCH_PULSE,
};
