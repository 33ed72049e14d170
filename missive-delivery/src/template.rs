//! Template dispatch table.
//!
//! One render function per [`TemplateKind`], built at startup. Deployments
//! can swap any of them through [`TemplateRegistry::register`].

use std::{collections::HashMap, fmt, fmt::Write as _, sync::Arc};

use missive_common::TemplateKind;
use missive_store::CampaignContent;
use serde::Deserialize;

use crate::{DeliveryError, SystemError, content::ContentItem, recipient::Recipient};

const UNSUBSCRIBE_PLACEHOLDER: &str = "{{unsubscribe_url}}";
const PREFERENCES_PLACEHOLDER: &str = "{{preferences_url}}";
const NAME_PLACEHOLDER: &str = "{{name}}";

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "defaults::name")]
    pub name: String,

    /// Public root of the site, without a trailing slash
    #[serde(default = "defaults::base_url")]
    pub base_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: defaults::name(),
            base_url: defaults::base_url(),
        }
    }
}

mod defaults {
    pub fn name() -> String {
        "Letters".to_string()
    }

    pub fn base_url() -> String {
        "https://letters.example".to_string()
    }
}

impl SiteConfig {
    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    #[must_use]
    pub fn unsubscribe_url(&self, recipient: &Recipient) -> String {
        format!("{}/unsubscribe?rid={}", self.base(), recipient.id)
    }

    #[must_use]
    pub fn preferences_url(&self, recipient: &Recipient) -> String {
        format!("{}/preferences?rid={}", self.base(), recipient.id)
    }

    #[must_use]
    pub fn verify_url(&self, recipient: &Recipient) -> String {
        format!("{}/verify?rid={}", self.base(), recipient.id)
    }

    #[must_use]
    pub fn reconsent_url(&self, recipient: &Recipient) -> String {
        format!("{}/reconsent?rid={}", self.base(), recipient.id)
    }
}

/// Inputs to a render function.
///
/// Without a recipient the output carries placeholders that
/// [`personalize`] fills in later, so one render can serve many recipients.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub site: &'a SiteConfig,
    pub recipient: Option<&'a Recipient>,
    pub items: &'a [ContentItem],
    pub campaign: Option<&'a CampaignContent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

pub type RenderFn = dyn Fn(&RenderContext<'_>) -> Result<Rendered, String> + Send + Sync;

#[derive(Clone)]
pub struct TemplateRegistry {
    site: SiteConfig,
    renderers: HashMap<TemplateKind, Arc<RenderFn>>,
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("site", &self.site)
            .field("kinds", &self.renderers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TemplateRegistry {
    /// A registry with the built-in renderer for every kind.
    #[must_use]
    pub fn new(site: SiteConfig) -> Self {
        let mut registry = Self {
            site,
            renderers: HashMap::new(),
        };

        registry.register(TemplateKind::Welcome, render_welcome);
        registry.register(TemplateKind::Verification, render_verification);
        registry.register(TemplateKind::DailyDigest, render_digest);
        registry.register(TemplateKind::WeeklyDigest, render_digest);
        registry.register(TemplateKind::MonthlyDigest, render_digest);
        registry.register(TemplateKind::Reconsent, render_reconsent);
        registry.register(TemplateKind::CustomCampaign, render_campaign);
        registry.register(TemplateKind::AllCaughtUp, render_all_caught_up);
        registry.register(TemplateKind::AutomatedNotice, render_campaign);

        registry
    }

    pub fn register(
        &mut self,
        kind: TemplateKind,
        render: impl Fn(&RenderContext<'_>) -> Result<Rendered, String> + Send + Sync + 'static,
    ) {
        self.renderers.insert(kind, Arc::new(render));
    }

    #[must_use]
    pub const fn site(&self) -> &SiteConfig {
        &self.site
    }

    pub fn render(
        &self,
        kind: TemplateKind,
        recipient: Option<&Recipient>,
        items: &[ContentItem],
        campaign: Option<&CampaignContent>,
    ) -> Result<Rendered, DeliveryError> {
        let render = self.renderers.get(&kind).ok_or_else(|| {
            SystemError::Template(format!("no renderer registered for {kind}"))
        })?;

        let context = RenderContext {
            site: &self.site,
            recipient,
            items,
            campaign,
        };

        render(&context).map_err(|e| SystemError::Template(format!("{kind}: {e}")).into())
    }
}

/// Fill recipient placeholders left by a recipient-less render.
///
/// The subject is plain text and takes the name as is; the body gets it
/// HTML-escaped.
#[must_use]
pub fn personalize(rendered: &Rendered, site: &SiteConfig, recipient: &Recipient) -> Rendered {
    let name = greeting_name(Some(recipient));
    let fill = |text: &str, name: &str| {
        text.replace(UNSUBSCRIBE_PLACEHOLDER, &site.unsubscribe_url(recipient))
            .replace(PREFERENCES_PLACEHOLDER, &site.preferences_url(recipient))
            .replace(NAME_PLACEHOLDER, name)
    };

    Rendered {
        subject: fill(&rendered.subject, name),
        body: fill(&rendered.body, &escape_html(name)),
    }
}

#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn greeting_name(recipient: Option<&Recipient>) -> &str {
    match recipient {
        Some(r) => r.display_name.as_deref().unwrap_or("reader"),
        None => NAME_PLACEHOLDER,
    }
}

fn layout(ctx: &RenderContext<'_>, heading: &str, inner: &str) -> String {
    let (unsubscribe, preferences) = ctx.recipient.map_or_else(
        || {
            (
                UNSUBSCRIBE_PLACEHOLDER.to_string(),
                PREFERENCES_PLACEHOLDER.to_string(),
            )
        },
        |r| (ctx.site.unsubscribe_url(r), ctx.site.preferences_url(r)),
    );
    let site = escape_html(&ctx.site.name);

    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{heading}</title></head>\n\
         <body>\n<h1>{heading}</h1>\n{inner}\n\
         <hr>\n<p class=\"footer\">You receive this because you subscribed to {site}. \
         <a href=\"{preferences}\">Manage preferences</a> | \
         <a href=\"{unsubscribe}\">Unsubscribe</a></p>\n</body></html>",
        heading = escape_html(heading),
    )
}

fn greeting(ctx: &RenderContext<'_>) -> String {
    let name = greeting_name(ctx.recipient);
    // The placeholder must survive escaping untouched.
    if ctx.recipient.is_none() {
        format!("<p>Hello {name},</p>")
    } else {
        format!("<p>Hello {},</p>", escape_html(name))
    }
}

#[allow(clippy::unnecessary_wraps, reason = "Signature is shared by every renderer")]
fn render_welcome(ctx: &RenderContext<'_>) -> Result<Rendered, String> {
    let inner = format!(
        "{}\n<p>Welcome to {}. New letters will arrive here as they are published.</p>\n\
         <p><a href=\"{}\">Read the latest letters</a></p>",
        greeting(ctx),
        escape_html(&ctx.site.name),
        ctx.site.base(),
    );

    Ok(Rendered {
        subject: format!("Welcome to {}", ctx.site.name),
        body: layout(ctx, "Welcome", &inner),
    })
}

fn render_verification(ctx: &RenderContext<'_>) -> Result<Rendered, String> {
    let recipient = ctx
        .recipient
        .ok_or_else(|| "verification needs a recipient".to_string())?;
    let inner = format!(
        "{}\n<p>Please confirm your address to start receiving letters.</p>\n\
         <p><a href=\"{}\">Confirm my subscription</a></p>",
        greeting(ctx),
        ctx.site.verify_url(recipient),
    );

    Ok(Rendered {
        subject: format!("Confirm your subscription to {}", ctx.site.name),
        body: layout(ctx, "Confirm your subscription", &inner),
    })
}

fn render_reconsent(ctx: &RenderContext<'_>) -> Result<Rendered, String> {
    let recipient = ctx
        .recipient
        .ok_or_else(|| "reconsent needs a recipient".to_string())?;
    let inner = format!(
        "{}\n<p>We are checking that you still want to hear from us.</p>\n\
         <p><a href=\"{}\">Yes, keep sending letters</a></p>",
        greeting(ctx),
        ctx.site.reconsent_url(recipient),
    );

    Ok(Rendered {
        subject: format!("Do you still want letters from {}?", ctx.site.name),
        body: layout(ctx, "Still interested?", &inner),
    })
}

fn render_digest(ctx: &RenderContext<'_>) -> Result<Rendered, String> {
    if ctx.items.is_empty() {
        return Err("digest has no letters".to_string());
    }

    let mut list = String::from("<ul class=\"letters\">\n");
    for item in ctx.items {
        let _ = write!(
            list,
            "<li><a href=\"{}\">{}</a>",
            escape_html(&item.url),
            escape_html(&item.title)
        );
        if !item.excerpt.is_empty() {
            let _ = write!(list, "<p>{}</p>", escape_html(&item.excerpt));
        }
        list.push_str("</li>\n");
    }
    list.push_str("</ul>");

    let subject = if let [only] = ctx.items {
        only.title.clone()
    } else {
        format!("{} new letters from {}", ctx.items.len(), ctx.site.name)
    };

    Ok(Rendered {
        subject,
        body: layout(ctx, "Your letters", &format!("{}\n{list}", greeting(ctx))),
    })
}

#[allow(clippy::unnecessary_wraps, reason = "Signature is shared by every renderer")]
fn render_all_caught_up(ctx: &RenderContext<'_>) -> Result<Rendered, String> {
    let inner = format!(
        "{}\n<p>You have read every letter we have published so far. \
         We will write again when there is something new.</p>",
        greeting(ctx)
    );

    Ok(Rendered {
        subject: format!("You're all caught up with {}", ctx.site.name),
        body: layout(ctx, "All caught up", &inner),
    })
}

fn render_campaign(ctx: &RenderContext<'_>) -> Result<Rendered, String> {
    let content = ctx
        .campaign
        .ok_or_else(|| "campaign content missing".to_string())?;

    // Campaign bodies are operator-authored HTML and go out as written.
    Ok(Rendered {
        subject: content.subject.clone(),
        body: layout(ctx, &content.subject, &content.body),
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use missive_common::ContentId;

    use super::*;
    use crate::recipient::tests::reader;

    fn letter(id: u64, title: &str) -> ContentItem {
        ContentItem {
            id: ContentId(id),
            title: title.to_string(),
            excerpt: String::new(),
            url: format!("https://letters.example/letters/{id}"),
            published_at: Utc::now(),
        }
    }

    #[test]
    fn every_kind_has_a_renderer() {
        let registry = TemplateRegistry::new(SiteConfig::default());
        for kind in TemplateKind::ALL {
            assert!(registry.renderers.contains_key(&kind), "{kind}");
        }
    }

    #[test]
    fn digest_lists_letters_and_escapes_titles() {
        let registry = TemplateRegistry::new(SiteConfig::default());
        let recipient = reader(7);
        let items = [letter(1, "On <tags>"), letter(2, "Second")];

        let rendered = registry
            .render(TemplateKind::WeeklyDigest, Some(&recipient), &items, None)
            .unwrap();

        assert_eq!(rendered.subject, "2 new letters from Letters");
        assert!(rendered.body.contains("On &lt;tags&gt;"));
        assert!(rendered.body.contains("https://letters.example/letters/2"));
        assert!(rendered.body.contains("/unsubscribe?rid=7"));
        assert!(rendered.body.contains("</body>"));
    }

    #[test]
    fn empty_digest_is_an_error() {
        let registry = TemplateRegistry::new(SiteConfig::default());
        let err = registry
            .render(TemplateKind::DailyDigest, Some(&reader(1)), &[], None)
            .unwrap_err();
        assert!(matches!(err, DeliveryError::System(SystemError::Template(_))));
    }

    #[test]
    fn shared_render_is_personalized_later() {
        let registry = TemplateRegistry::new(SiteConfig::default());
        let content = CampaignContent {
            subject: "Spring issue".to_string(),
            body: "<p>Dear {{name}}, <a href=\"https://letters.example/spring\">read</a></p>"
                .to_string(),
        };

        let shared = registry
            .render(TemplateKind::CustomCampaign, None, &[], Some(&content))
            .unwrap();
        assert!(shared.body.contains(UNSUBSCRIBE_PLACEHOLDER));

        let mut recipient = reader(12);
        recipient.display_name = Some("Ada".to_string());
        let personal = personalize(&shared, registry.site(), &recipient);

        assert!(personal.body.contains("Dear Ada"));
        assert!(personal.body.contains("/unsubscribe?rid=12"));
        assert!(personal.body.contains("/preferences?rid=12"));
        assert!(!personal.body.contains("{{"));
    }

    #[test]
    fn personalized_subject_keeps_the_name_unescaped() {
        let registry = TemplateRegistry::new(SiteConfig::default());
        let content = CampaignContent {
            subject: "A letter for {{name}}".to_string(),
            body: "<p>Dear {{name}},</p>".to_string(),
        };
        let shared = registry
            .render(TemplateKind::CustomCampaign, None, &[], Some(&content))
            .unwrap();

        let mut recipient = reader(3);
        recipient.display_name = Some("Siobhán O'Brien".to_string());
        let personal = personalize(&shared, registry.site(), &recipient);

        assert_eq!(personal.subject, "A letter for Siobhán O'Brien");
        assert!(personal.body.contains("Dear Siobhán O&#39;Brien,"));
    }

    #[test]
    fn registered_renderer_replaces_builtin() {
        let mut registry = TemplateRegistry::new(SiteConfig::default());
        registry.register(TemplateKind::Welcome, |_| {
            Ok(Rendered {
                subject: "Hi".to_string(),
                body: "custom".to_string(),
            })
        });

        let rendered = registry
            .render(TemplateKind::Welcome, Some(&reader(1)), &[], None)
            .unwrap();
        assert_eq!(rendered.body, "custom");
    }
}
