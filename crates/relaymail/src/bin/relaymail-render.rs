//! relaymail-render - build a message and print its raw MIME form
//!
//! Usage:
//!   relaymail-render --from a@x.com --to b@y.com --subject Hi --text hello
//!   relaymail-render --config mailer.json --to b@y.com --subject Receipt \
//!       --templates templates/ --template receipt --vars '{"total": "9.99"}' \
//!       --attach receipt.pdf
//!
//! The message goes through the full send pipeline with a transport that
//! writes to stdout. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relaymail::{DirectoryTemplates, Mailer, MailerConfig, Variables, WriterTransport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "relaymail-render", version, about = "Render an email to raw MIME")]
struct Args {
    /// JSON mailer configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Require an MX record for every address (DNS lookup).
    #[arg(long)]
    verify_mx: bool,

    /// Sender address (overrides the configured default).
    #[arg(long)]
    from: Option<String>,

    /// Sender display name.
    #[arg(long)]
    from_name: Option<String>,

    /// Recipient address.
    #[arg(long)]
    to: String,

    /// Blind-copy address.
    #[arg(long)]
    bcc: Option<String>,

    /// Bounce address.
    #[arg(long)]
    return_path: Option<String>,

    /// Subject line.
    #[arg(long)]
    subject: String,

    /// Plain-text body.
    #[arg(long)]
    text: Option<String>,

    /// HTML body.
    #[arg(long)]
    html: Option<String>,

    /// Directory holding `<name>.html` templates.
    #[arg(long, requires = "template")]
    templates: Option<PathBuf>,

    /// Template rendered into the HTML body; the text body is derived.
    #[arg(long, requires = "templates")]
    template: Option<String>,

    /// Template variables as a JSON object.
    #[arg(long, default_value = "{}")]
    vars: String,

    /// File to attach. Repeat for several.
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaymail=info,relaymail_mime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => MailerConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => MailerConfig::default(),
    };
    config.verify_mx |= args.verify_mx;

    let mut mailer = Mailer::new(config, Arc::new(WriterTransport::new(std::io::stdout())));
    #[cfg(feature = "dns")]
    if mailer.config().verify_mx {
        let resolver = relaymail::DnsMxResolver::new(relaymail::DnsConfig::default())
            .context("Failed to set up DNS resolver")?;
        mailer = mailer.with_mx_resolver(Arc::new(resolver));
    }
    if let Some(dir) = &args.templates {
        mailer = mailer.with_templates(Arc::new(DirectoryTemplates::new(dir)));
    }

    let mut email = mailer.compose()?;
    if let Some(from) = &args.from {
        email.set_sender(from)?;
    }
    if let Some(name) = &args.from_name {
        email.set_sender_name(name.as_str());
    }
    email.set_recipient(&args.to)?.set_subject(args.subject.as_str());
    if let Some(bcc) = &args.bcc {
        email.set_bcc(bcc)?;
    }
    if let Some(return_path) = &args.return_path {
        email.set_return_path(return_path)?;
    }

    if let Some(name) = &args.template {
        let variables: Variables =
            serde_json::from_str(&args.vars).context("--vars must be a JSON object")?;
        email.set_template(name, &variables)?;
    }
    if let Some(text) = &args.text {
        email.set_text_body(text.as_str());
    }
    if let Some(html) = &args.html {
        email.set_html_body(html.as_str());
    }
    for path in &args.attachments {
        email
            .add_attachment(path)
            .with_context(|| format!("Failed to attach {}", path.display()))?;
    }

    let receipt = email.send()?;
    tracing::debug!(message_id = %receipt.message_id, "Done");
    Ok(())
}
