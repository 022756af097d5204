//! services/template_service.rs
//! Personalización de contenido con minijinja: `{{name}}` o `{{ name }}`.
//!
//! El contenido HTML se renderiza con autoescape, así el nombre del contacto
//! nunca inserta marcado; el resto del template es del operador y queda igual.
//! Asunto y SMS van en texto plano. Variables desconocidas son un error.

use minijinja::{context, AutoEscape, Environment, UndefinedBehavior};

use crate::errors::{CampaignError, CampaignResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateEscape {
    Html,
    Plain,
}

pub struct TemplateRenderer {
    html: Environment<'static>,
    plain: Environment<'static>,
    fallback_name: String,
}

impl TemplateRenderer {
    pub fn new(fallback_name: &str) -> Self {
        TemplateRenderer {
            html: environment(AutoEscape::Html),
            plain: environment(AutoEscape::None),
            fallback_name: fallback_name.trim().to_string(),
        }
    }

    /// Compila el template y lo prueba con el nombre de respaldo, para
    /// rechazar la campaña antes de tomar candado o cupo.
    pub fn check(&self, source: &str, escape: TemplateEscape) -> CampaignResult<()> {
        self.render_all(source, escape, std::iter::once(""))
            .map(|_| ())
            .map_err(|e| CampaignError::InvalidRequest(format!("Plantilla inválida: {:#}", e)))
    }

    pub fn render(&self, source: &str, name: &str, escape: TemplateEscape) -> anyhow::Result<String> {
        let mut rendered = self.render_all(source, escape, std::iter::once(name))?;
        Ok(rendered.pop().unwrap_or_default())
    }

    /// Un texto por nombre, compilando el template una sola vez
    pub fn render_all<'n>(
        &self,
        source: &str,
        escape: TemplateEscape,
        names: impl IntoIterator<Item = &'n str>,
    ) -> anyhow::Result<Vec<String>> {
        let env = match escape {
            TemplateEscape::Html => &self.html,
            TemplateEscape::Plain => &self.plain,
        };
        let template = env.template_from_str(source)?;
        names
            .into_iter()
            .map(|name| {
                let name = match name.trim() {
                    "" => self.fallback_name.as_str(),
                    trimmed => trimmed,
                };
                template
                    .render(context! { name => name })
                    .map_err(anyhow::Error::from)
            })
            .collect()
    }
}

fn environment(escape: AutoEscape) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(move |_| escape);
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}
