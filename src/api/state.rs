use crate::normalize::Normalizer;
use crate::storage::AlertStore;

#[derive(Clone)]
pub struct AppState {
    pub store: AlertStore,
    pub normalizer: Normalizer,
}
