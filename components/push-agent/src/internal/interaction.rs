/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! What happens when the user clicks or closes a notification.

use url::Url;

use crate::error::{info, warn, Result};
use crate::internal::config::AgentConfiguration;
use crate::internal::host::{AgentHost, AnalyticsHook};
use crate::internal::messages::AgentMessage;
use crate::internal::push::{NotificationData, DISMISS_ACTION};

/// Ids the platform may report for the dismiss action.
const DISMISS_ACTIONS: [&str; 2] = [DISMISS_ACTION, "close"];

/// A click on a notification or one of its actions.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationClick {
    pub tag: String,
    /// `None` for a click on the body
    pub action: Option<String>,
    pub data: NotificationData,
}

/// Terminal state of a clicked notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    FocusedExisting { client_id: String },
    OpenedNew { url: String },
    Dismissed,
}

pub fn handle_click<H: AgentHost + ?Sized>(
    config: &AgentConfiguration,
    host: &H,
    click: &NotificationClick,
) -> Result<ClickOutcome> {
    host.close_notification(&click.tag)?;

    if let Some(action) = click.action.as_deref() {
        if DISMISS_ACTIONS.contains(&action) {
            info!("notification '{}' dismissed", click.tag);
            return Ok(ClickOutcome::Dismissed);
        }
    }

    let windows = host.match_all_windows(true)?;
    let root = windows
        .iter()
        .find(|w| Url::parse(&w.url).map(|u| u.path() == "/").unwrap_or(false));
    if let Some(window) = root {
        host.focus(&window.id)?;
        host.post_message(
            &window.id,
            &AgentMessage::NotificationClicked {
                data: click.data.clone(),
            },
        )?;
        info!("routed notification '{}' to window {}", click.tag, window.id);
        return Ok(ClickOutcome::FocusedExisting {
            client_id: window.id.clone(),
        });
    }

    let url = config
        .resolve(click.data.action_url.as_deref().unwrap_or("/"))?
        .to_string();
    host.open_window(&url)?;
    info!("opened {} for notification '{}'", url, click.tag);
    Ok(ClickOutcome::OpenedNew { url })
}

/// A notification closed without a click. Only the optional analytics hook cares.
pub fn handle_close(
    analytics: Option<&dyn AnalyticsHook>,
    tag: &str,
    data: &NotificationData,
) {
    if let Some(hook) = analytics {
        if let Err(e) = hook.notification_dismissed(tag, data) {
            warn!("analytics hook failed for '{}': {}", tag, e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;
    use crate::internal::host::WindowClient;
    use crate::internal::testing::{FakeHost, HostCall};
    use std::cell::RefCell;

    fn click(action: Option<&str>, action_url: Option<&str>) -> NotificationClick {
        NotificationClick {
            tag: "order".to_string(),
            action: action.map(String::from),
            data: NotificationData {
                action_url: action_url.map(String::from),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_click_focuses_root_window() {
        let config = AgentConfiguration::default();
        let host = FakeHost::default();
        host.add_window(WindowClient {
            id: "w-products".to_string(),
            url: "https://shop.example.com/products".to_string(),
            focused: true,
        });
        host.add_window(WindowClient {
            id: "w-root".to_string(),
            url: "https://shop.example.com/".to_string(),
            focused: false,
        });

        let outcome =
            handle_click(&config, &host, &click(None, Some("/track-order?orderId=9"))).unwrap();
        assert_eq!(
            outcome,
            ClickOutcome::FocusedExisting {
                client_id: "w-root".to_string()
            }
        );
        let calls = host.calls();
        assert_eq!(calls[0], HostCall::Close("order".to_string()));
        assert!(calls.contains(&HostCall::Focus("w-root".to_string())));
        let expected = serde_json::json!({
            "type": "NOTIFICATION_CLICKED",
            "data": {"actionUrl": "/track-order?orderId=9"}
        });
        assert!(calls.iter().any(|c| matches!(c,
            HostCall::Post(id, msg) if id == "w-root" && serde_json::to_value(msg).unwrap() == expected)));
        assert!(!calls.iter().any(|c| matches!(c, HostCall::Open(_))));
    }

    #[test]
    fn test_click_opens_window() {
        let config = AgentConfiguration::default();
        let host = FakeHost::default();
        let outcome = handle_click(&config, &host, &click(Some("open"), Some("/deals"))).unwrap();
        assert_eq!(
            outcome,
            ClickOutcome::OpenedNew {
                url: "https://shop.example.com/deals".to_string()
            }
        );

        // with no actionUrl we land on the home page.
        let outcome = handle_click(&config, &host, &click(None, None)).unwrap();
        assert_eq!(
            outcome,
            ClickOutcome::OpenedNew {
                url: "https://shop.example.com/".to_string()
            }
        );
    }

    #[test]
    fn test_dismiss_action() {
        let config = AgentConfiguration::default();
        for action in ["dismiss", "close"] {
            let host = FakeHost::default();
            host.add_window(WindowClient {
                id: "w-root".to_string(),
                url: "https://shop.example.com/".to_string(),
                focused: false,
            });
            let outcome = handle_click(&config, &host, &click(Some(action), Some("/x"))).unwrap();
            assert_eq!(outcome, ClickOutcome::Dismissed);
            assert_eq!(host.calls(), vec![HostCall::Close("order".to_string())]);
        }
    }

    struct RecordingHook {
        seen: RefCell<Vec<String>>,
        fail: bool,
    }

    impl AnalyticsHook for RecordingHook {
        fn notification_dismissed(&self, tag: &str, _data: &NotificationData) -> Result<()> {
            self.seen.borrow_mut().push(tag.to_string());
            if self.fail {
                return Err(Error::HostError("analytics down".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_close_hook() {
        let data = NotificationData::default();
        // no hook is fine.
        handle_close(None, "order", &data);

        let hook = RecordingHook {
            seen: RefCell::new(vec![]),
            fail: true,
        };
        handle_close(Some(&hook), "order", &data);
        assert_eq!(*hook.seen.borrow(), vec!["order".to_string()]);
    }
}
